//! JSON-RPC 2.0 message types and body parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Request id: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id are notifications and never get an answer.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    /// `null` when the request id could not be determined.
    pub id: Option<JsonRpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// One entry of a (possibly single-element) message body.
#[derive(Debug, Clone)]
pub enum BatchItem {
    Request(JsonRpcRequest),
    /// A response or result sent by the client; acknowledged, not processed.
    ClientResponse,
    /// An entry that is not a valid JSON-RPC message.
    Invalid {
        id: Option<JsonRpcId>,
        error: JsonRpcError,
    },
}

/// A parsed message body.
#[derive(Debug, Clone)]
pub struct ParsedBody {
    pub items: Vec<BatchItem>,
    pub is_batch: bool,
}

impl ParsedBody {
    pub fn requests(&self) -> impl Iterator<Item = &JsonRpcRequest> {
        self.items.iter().filter_map(|item| match item {
            BatchItem::Request(request) => Some(request),
            _ => None,
        })
    }

    /// Whether any entry expects an answer.
    pub fn expects_response(&self) -> bool {
        self.items.iter().any(|item| match item {
            BatchItem::Request(request) => !request.is_notification(),
            BatchItem::Invalid { .. } => true,
            BatchItem::ClientResponse => false,
        })
    }

    pub fn contains_initialize(&self) -> bool {
        self.requests().any(|request| request.method == "initialize")
    }
}

/// Parses a message body; an unparseable body yields the error response to
/// send back.
pub fn parse_body(bytes: &[u8]) -> Result<ParsedBody, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        JsonRpcResponse::failure(
            None,
            JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
        )
    })?;

    match value {
        Value::Array(entries) if entries.is_empty() => Err(JsonRpcResponse::failure(
            None,
            JsonRpcError::new(INVALID_REQUEST, "Invalid Request: empty batch"),
        )),
        Value::Array(entries) => Ok(ParsedBody {
            items: entries.into_iter().map(parse_item).collect(),
            is_batch: true,
        }),
        single => Ok(ParsedBody {
            items: vec![parse_item(single)],
            is_batch: false,
        }),
    }
}

fn parse_item(value: Value) -> BatchItem {
    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<JsonRpcId>(id.clone()).ok());

    if value.get("method").is_none() {
        if value.get("result").is_some() || value.get("error").is_some() {
            return BatchItem::ClientResponse;
        }
        return BatchItem::Invalid {
            id,
            error: JsonRpcError::new(INVALID_REQUEST, "Invalid Request: missing method"),
        };
    }

    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) if request.jsonrpc == "2.0" => BatchItem::Request(request),
        Ok(_) => BatchItem::Invalid {
            id,
            error: JsonRpcError::new(INVALID_REQUEST, "Invalid Request: jsonrpc must be \"2.0\""),
        },
        Err(e) => BatchItem::Invalid {
            id,
            error: JsonRpcError::new(INVALID_REQUEST, format!("Invalid Request: {}", e)),
        },
    }
}
