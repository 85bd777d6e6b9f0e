//! Tools exposed over `tools/list` and `tools/call`.

pub mod docs;
pub mod errors;
pub mod notes;
pub mod weather;

use mcp_gate::NoteStore;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use weather::WeatherClient;

/// Why a tool call produced no result.
#[derive(Debug)]
pub enum CallError {
    UnknownTool(String),
    InvalidArguments(String),
    /// Failure outside the tool's control, e.g. the data service.
    Failed(anyhow::Error),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::UnknownTool(name) => write!(f, "Tool {} not found", name),
            CallError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            CallError::Failed(e) => write!(f, "tool failed: {:#}", e),
        }
    }
}

impl From<mcp_gate::Error> for CallError {
    fn from(e: mcp_gate::Error) -> Self {
        CallError::Failed(e.into())
    }
}

pub type CallResult = std::result::Result<Value, CallError>;

/// Wraps a payload as a tool result with a single JSON text item.
pub fn text_result<T: Serialize + ?Sized>(payload: &T) -> Value {
    let text = match serde_json::to_string(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("failed to serialize tool payload: {}", e);
            r#"{"success":false,"error_code":"INTERNAL_ERROR","message":"Failed to encode result."}"#
                .to_string()
        }
    };
    json!({ "content": [{ "type": "text", "text": text }] })
}

/// Tool result whose text is returned as-is.
pub fn plain_text_result(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

pub(crate) fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, CallError> {
    serde_json::from_value(arguments).map_err(|e| CallError::InvalidArguments(e.to_string()))
}

/// Every tool the server offers, with the services they run against.
pub struct Toolbox {
    notes: Arc<dyn NoteStore>,
    weather: WeatherClient,
}

impl Toolbox {
    pub fn new(notes: Arc<dyn NoteStore>, weather: WeatherClient) -> Self {
        Self { notes, weather }
    }

    /// Tool descriptors for `tools/list`.
    pub fn definitions(&self) -> Vec<Value> {
        let mut tools = notes::definitions();
        tools.push(weather::definition());
        tools.push(docs::definition());
        tools
    }

    pub async fn call(&self, name: &str, arguments: Value) -> CallResult {
        tracing::debug!("calling tool {}", name);
        let store = self.notes.as_ref();
        match name {
            "list_notes" => notes::list_notes(store).await,
            "get_note" => notes::get_note(store, parse_arguments(arguments)?).await,
            "create_note" => notes::create_note(store, parse_arguments(arguments)?).await,
            "delete_note" => notes::delete_note(store, parse_arguments(arguments)?).await,
            "search_notes" => notes::search_notes(store, parse_arguments(arguments)?).await,
            "get_weather" => Ok(self.weather.current(parse_arguments(arguments)?).await),
            "get_documentation" => docs::get_documentation(parse_arguments(arguments)?),
            other => Err(CallError::UnknownTool(other.to_string())),
        }
    }
}
