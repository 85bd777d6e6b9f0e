//! Tool error payloads, shaped so an agent can act on them.

use super::text_result;
use serde::Serialize;
use serde_json::Value;

/// Codes shared by every tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidInput,
    InternalError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    success: bool,
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl ToolError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code,
            message: message.into(),
            suggestion: None,
            fix: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    /// The tool result carrying this error as its text content.
    pub fn into_result(self) -> Value {
        text_result(&self)
    }
}

pub fn not_found(resource: &str, id: &str) -> Value {
    ToolError::new(
        ErrorCode::NotFound,
        format!("{} with ID \"{}\" not found.", resource, id),
    )
    .with_fix(format!(
        "Use the list tool to see all available {}s.",
        resource.to_lowercase()
    ))
    .into_result()
}

pub fn invalid_input(message: impl Into<String>, fix: Option<&str>) -> Value {
    let mut error = ToolError::new(ErrorCode::InvalidInput, message);
    if let Some(fix) = fix {
        error = error.with_fix(fix);
    }
    error.into_result()
}

pub fn internal(message: impl Into<String>) -> Value {
    ToolError::new(ErrorCode::InternalError, message)
        .with_suggestion("Retry the request; if it keeps failing, report it to the server operator.")
        .into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(result: &Value) -> Value {
        let text = result["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn not_found_names_the_list_tool() {
        let result = not_found("Note", "42");
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(
            payload(&result),
            json!({
                "success": false,
                "error_code": "NOT_FOUND",
                "message": "Note with ID \"42\" not found.",
                "fix": "Use the list tool to see all available notes."
            })
        );
    }

    #[test]
    fn invalid_input_omits_missing_fix() {
        let body = payload(&invalid_input("bad", None));
        assert_eq!(body["error_code"], "INVALID_INPUT");
        assert!(body.get("fix").is_none());
        assert!(body.get("suggestion").is_none());
    }

    #[test]
    fn internal_errors_suggest_a_retry() {
        let body = payload(&internal("upstream down"));
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "upstream down");
        assert!(body["suggestion"].as_str().unwrap().starts_with("Retry"));
        assert!(body.get("fix").is_none());
    }
}
