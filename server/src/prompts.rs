//! Reusable prompt templates offered to clients.

use crate::mcp::jsonrpc::JsonRpcError;
use serde_json::{Map, Value, json};

pub fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "summarize-notes",
            "description": "Summarize all notes into a brief overview",
            "arguments": [],
        }),
        json!({
            "name": "draft-note",
            "description": "Help draft a new note on a given topic",
            "arguments": [{
                "name": "topic",
                "description": "The topic to write about",
                "required": true,
            }],
        }),
    ]
}

/// Renders prompt `name` with the caller's arguments.
pub fn get(name: &str, arguments: &Map<String, Value>) -> Result<Value, JsonRpcError> {
    let text = match name {
        "summarize-notes" => {
            "Please list all notes using the list_notes tool and provide a brief summary of each one."
                .to_string()
        }
        "draft-note" => {
            let topic = arguments
                .get("topic")
                .and_then(Value::as_str)
                .ok_or_else(|| JsonRpcError::invalid_params("Missing required argument: topic"))?;
            format!(
                "Please help me draft a note about: {}\n\nCreate a well-structured note with a clear title and organized content. Use the create_note tool to save it.",
                topic
            )
        }
        other => {
            return Err(JsonRpcError::invalid_params(format!(
                "Prompt {} not found",
                other
            )));
        }
    };

    let description = definitions()
        .into_iter()
        .find(|prompt| prompt["name"] == name)
        .and_then(|prompt| prompt["description"].as_str().map(str::to_string));

    Ok(json!({
        "description": description,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text },
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::jsonrpc::INVALID_PARAMS;

    #[test]
    fn draft_note_fills_in_the_topic() {
        let mut arguments = Map::new();
        arguments.insert("topic".to_string(), json!("rust lifetimes"));

        let prompt = get("draft-note", &arguments).unwrap();
        let text = prompt["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.starts_with("Please help me draft a note about: rust lifetimes\n\n"));
        assert_eq!(prompt["messages"][0]["role"], "user");
        assert_eq!(prompt["description"], "Help draft a new note on a given topic");
    }

    #[test]
    fn draft_note_requires_a_topic() {
        let error = get("draft-note", &Map::new()).unwrap_err();
        assert_eq!(error.code, INVALID_PARAMS);
    }

    #[test]
    fn summarize_takes_no_arguments() {
        let prompt = get("summarize-notes", &Map::new()).unwrap();
        assert!(
            prompt["messages"][0]["content"]["text"]
                .as_str()
                .unwrap()
                .contains("list_notes")
        );
    }

    #[test]
    fn unknown_prompt() {
        assert_eq!(get("nope", &Map::new()).unwrap_err().message, "Prompt nope not found");
    }
}
