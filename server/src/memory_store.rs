use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcp_gate::{
    error::{Error, Result},
    store::{Note, NoteStore},
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const SEED_NOTES: [(&str, &str); 3] = [
    (
        "Welcome",
        "Welcome to your MCP server! This is a sample note.",
    ),
    (
        "Getting Started",
        "Check out the README for setup instructions and customization guide.",
    ),
    (
        "Architecture",
        "This server runs an axum gateway in front of an MCP engine, with notes kept in memory.",
    ),
];

struct Notes {
    by_id: HashMap<String, Note>,
    next_id: u64,
}

/// Note store kept in process memory; everything is lost on restart.
#[derive(Clone)]
pub struct MemoryNoteStore {
    notes: Arc<RwLock<Notes>>,
}

impl MemoryNoteStore {
    /// Store seeded with a few example notes.
    pub fn new() -> Self {
        let mut notes = Notes::new();
        let now = Utc::now();
        for (title, content) in SEED_NOTES {
            notes.insert_at(title, content, now);
        }
        Self::from_notes(notes)
    }

    pub fn empty() -> Self {
        Self::from_notes(Notes::new())
    }

    fn from_notes(notes: Notes) -> Self {
        Self {
            notes: Arc::new(RwLock::new(notes)),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Notes>> {
        self.notes
            .read()
            .map_err(|_| Error::StorageError("note store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Notes>> {
        self.notes
            .write()
            .map_err(|_| Error::StorageError("note store lock poisoned".to_string()))
    }
}

impl Default for MemoryNoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Notes {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert_at(&mut self, title: &str, content: &str, now: DateTime<Utc>) -> Note {
        let id = self.next_id.to_string();
        self.next_id += 1;

        let note = Note {
            id: id.clone(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.by_id.insert(id, note.clone());
        note
    }

    /// Most recently updated first; equal timestamps keep creation order.
    fn sorted(&self, mut notes: Vec<Note>) -> Vec<Note> {
        notes.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| sequence(a).cmp(&sequence(b)))
        });
        notes
    }
}

fn sequence(note: &Note) -> u64 {
    note.id.parse().unwrap_or(u64::MAX)
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn list(&self) -> Result<Vec<Note>> {
        let notes = self.read()?;
        Ok(notes.sorted(notes.by_id.values().cloned().collect()))
    }

    async fn get(&self, id: &str) -> Result<Option<Note>> {
        Ok(self.read()?.by_id.get(id).cloned())
    }

    async fn create(&self, title: &str, content: &str) -> Result<Note> {
        let note = self.write()?.insert_at(title, content, Utc::now());
        tracing::debug!("created note {}", note.id);
        Ok(note)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.by_id.remove(id).is_some())
    }

    async fn search(&self, query: &str) -> Result<Vec<Note>> {
        let query = query.to_lowercase();
        let notes = self.read()?;
        let matches = notes
            .by_id
            .values()
            .filter(|note| {
                note.title.to_lowercase().contains(&query)
                    || note.content.to_lowercase().contains(&query)
            })
            .cloned()
            .collect();
        Ok(notes.sorted(matches))
    }
}
