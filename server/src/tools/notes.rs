use super::{CallResult, errors, text_result};
use chrono::SecondsFormat;
use mcp_gate::{Note, NoteStore};
use serde::Deserialize;
use serde_json::{Value, json};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct NoteIdArgs {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteArgs {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub query: String,
}

pub fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_notes",
            "title": "List Notes",
            "description": "List all notes, sorted by last updated",
            "inputSchema": { "type": "object", "properties": {} },
            "annotations": { "readOnlyHint": true, "openWorldHint": false },
        }),
        json!({
            "name": "get_note",
            "title": "Get Note",
            "description": "Get a note by its ID",
            "inputSchema": {
                "type": "object",
                "properties": { "id": { "type": "string", "description": "The note ID" } },
                "required": ["id"],
            },
            "annotations": { "readOnlyHint": true, "openWorldHint": false },
        }),
        json!({
            "name": "create_note",
            "title": "Create Note",
            "description": "Create a new note",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Note title" },
                    "content": { "type": "string", "description": "Note content (markdown supported)" },
                },
                "required": ["title", "content"],
            },
            "annotations": {
                "readOnlyHint": false,
                "destructiveHint": false,
                "idempotentHint": false,
                "openWorldHint": false,
            },
        }),
        json!({
            "name": "delete_note",
            "title": "Delete Note",
            "description": "Delete a note by ID",
            "inputSchema": {
                "type": "object",
                "properties": { "id": { "type": "string", "description": "The note ID to delete" } },
                "required": ["id"],
            },
            "annotations": {
                "readOnlyHint": false,
                "destructiveHint": true,
                "idempotentHint": true,
                "openWorldHint": false,
            },
        }),
        json!({
            "name": "search_notes",
            "title": "Search Notes",
            "description": "Search notes by title or content",
            "inputSchema": {
                "type": "object",
                "properties": { "query": { "type": "string", "description": "Search query" } },
                "required": ["query"],
            },
            "annotations": { "readOnlyHint": true, "openWorldHint": false },
        }),
    ]
}

/// First 100 characters of the content, with `...` when cut.
fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

pub async fn list_notes(store: &dyn NoteStore) -> CallResult {
    let notes = store.list().await?;
    let summaries: Vec<Value> = notes
        .iter()
        .map(|note| {
            json!({
                "id": note.id,
                "title": note.title,
                "content": preview(&note.content),
                "updatedAt": note.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            })
        })
        .collect();

    Ok(text_result(&json!({
        "success": true,
        "count": notes.len(),
        "notes": summaries,
    })))
}

pub async fn get_note(store: &dyn NoteStore, args: NoteIdArgs) -> CallResult {
    match store.get(&args.id).await? {
        Some(note) => Ok(note_result(&note)),
        None => Ok(errors::not_found("Note", &args.id)),
    }
}

pub async fn create_note(store: &dyn NoteStore, args: CreateNoteArgs) -> CallResult {
    let note = store.create(&args.title, &args.content).await?;
    Ok(note_result(&note))
}

pub async fn delete_note(store: &dyn NoteStore, args: NoteIdArgs) -> CallResult {
    if !store.delete(&args.id).await? {
        return Ok(errors::not_found("Note", &args.id));
    }
    Ok(text_result(&json!({
        "success": true,
        "message": format!("Note {} deleted.", args.id),
    })))
}

pub async fn search_notes(store: &dyn NoteStore, args: SearchArgs) -> CallResult {
    let notes = store.search(&args.query).await?;
    let matches: Vec<Value> = notes
        .iter()
        .map(|note| {
            json!({
                "id": note.id,
                "title": note.title,
                "content": preview(&note.content),
            })
        })
        .collect();

    Ok(text_result(&json!({
        "success": true,
        "query": args.query,
        "count": notes.len(),
        "notes": matches,
    })))
}

fn note_result(note: &Note) -> Value {
    text_result(&json!({ "success": true, "note": note }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryNoteStore;

    fn payload(result: &Value) -> Value {
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[test]
    fn preview_cuts_long_content() {
        assert_eq!(preview("short"), "short");
        let exact = "x".repeat(100);
        assert_eq!(preview(&exact), exact);
        let long = "é".repeat(120);
        assert_eq!(preview(&long), format!("{}...", "é".repeat(100)));
    }

    #[tokio::test]
    async fn list_returns_summaries() {
        let store = MemoryNoteStore::new();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create("Long", &"a".repeat(150)).await.unwrap();

        let body = payload(&list_notes(&store).await.unwrap());
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 4);
        let newest = &body["notes"][0];
        assert_eq!(newest["title"], "Long");
        assert_eq!(newest["content"].as_str().unwrap().len(), 103);
        assert!(newest["updatedAt"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn get_and_delete_report_missing_notes() {
        let store = MemoryNoteStore::new();

        let found = payload(&get_note(&store, NoteIdArgs { id: "1".into() }).await.unwrap());
        assert_eq!(found["note"]["title"], "Welcome");
        let created = found["note"]["createdAt"].as_str().unwrap();
        assert_eq!(created.len(), "2025-01-02T03:04:05.123Z".len());
        assert_eq!(&created[19..20], ".");

        let missing = payload(&get_note(&store, NoteIdArgs { id: "9".into() }).await.unwrap());
        assert_eq!(missing["error_code"], "NOT_FOUND");

        let deleted = payload(&delete_note(&store, NoteIdArgs { id: "2".into() }).await.unwrap());
        assert_eq!(deleted["message"], "Note 2 deleted.");

        let again = payload(&delete_note(&store, NoteIdArgs { id: "2".into() }).await.unwrap());
        assert_eq!(again["message"], "Note with ID \"2\" not found.");
    }

    #[tokio::test]
    async fn create_then_search() {
        let store = MemoryNoteStore::new();
        let created = payload(
            &create_note(
                &store,
                CreateNoteArgs {
                    title: "Groceries".into(),
                    content: "Milk and eggs".into(),
                },
            )
            .await
            .unwrap(),
        );
        assert_eq!(created["note"]["id"], "4");

        let found = payload(
            &search_notes(&store, SearchArgs { query: "EGGS".into() })
                .await
                .unwrap(),
        );
        assert_eq!(found["query"], "EGGS");
        assert_eq!(found["count"], 1);
        assert_eq!(found["notes"][0]["title"], "Groceries");
        assert!(found["notes"][0].get("updatedAt").is_none());
    }
}
