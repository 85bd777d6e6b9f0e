use super::{CallError, CallResult, plain_text_result};
use serde::Deserialize;
use serde_json::{Value, json};

/// `(topic, title, markdown)` for every documentation page.
const TOPICS: [(&str, &str, &str); 1] = [(
    "getting-started",
    "Getting Started Guide",
    include_str!("../../docs/getting-started.md"),
)];

#[derive(Debug, Deserialize)]
pub struct DocumentationArgs {
    pub topic: String,
}

fn topic_list() -> String {
    TOPICS
        .iter()
        .map(|(topic, title, _)| format!("- {}: {}", topic, title))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn definition() -> Value {
    let topics: Vec<&str> = TOPICS.iter().map(|(topic, _, _)| *topic).collect();
    json!({
        "name": "get_documentation",
        "description": format!("Get server documentation. Available topics:\n{}", topic_list()),
        "inputSchema": {
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "enum": topics,
                    "description": "Documentation topic to retrieve",
                },
            },
            "required": ["topic"],
        },
    })
}

pub fn get_documentation(args: DocumentationArgs) -> CallResult {
    TOPICS
        .iter()
        .find(|(topic, _, _)| *topic == args.topic)
        .map(|(_, _, markdown)| plain_text_result(markdown))
        .ok_or_else(|| {
            CallError::InvalidArguments(format!(
                "unknown documentation topic {:?}, expected one of: {}",
                args.topic,
                TOPICS
                    .iter()
                    .map(|(topic, _, _)| *topic)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}
