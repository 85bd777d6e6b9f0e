//! MCP engine: JSON-RPC over streamable HTTP and the legacy SSE transport.

pub mod jsonrpc;
pub mod session;

use crate::prompts;
use crate::tools::{CallError, Toolbox};
use async_trait::async_trait;
use axum::{
    Json,
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use jsonrpc::{
    BatchItem, INTERNAL_ERROR, INVALID_REQUEST, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    PARSE_ERROR, ParsedBody, parse_body,
};
use mcp_gate::{CallerIdentity, GatewayConfig, ProtocolEngine, SESSION_HEADER};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use session::{Session, SessionStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

/// Supported protocol revisions, newest first.
pub const PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
const EVENT_BUFFER: usize = 32;

// Server-defined JSON-RPC codes for transport errors
const SESSION_REQUIRED: i64 = -32000;
const SESSION_NOT_FOUND: i64 = -32001;

/// Sent to clients at initialization.
pub const SERVER_INSTRUCTIONS: &str = "You are connected to an MCP server. Available capabilities:

## Tools

### Notes (CRUD)
- list_notes: List all notes
- get_note: Get a note by ID
- create_note: Create a new note
- delete_note: Delete a note
- search_notes: Search notes by title or content

### Weather
- get_weather: Get current weather for any city (via Open-Meteo)

### Documentation
- get_documentation: Read server documentation

## Workflow
1. Use list_notes to see existing notes
2. Use create_note to add new ones
3. Use get_weather for weather queries
4. Use get_documentation to learn about the server";

/// Identity reported in the `initialize` result.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub title: String,
    pub version: String,
}

impl ServerInfo {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            name: config.server_slug(),
            title: config.server_name.clone(),
            version: config.server_version.clone(),
        }
    }
}

enum MethodError {
    Rpc(JsonRpcError),
    Failed(anyhow::Error),
}

impl From<JsonRpcError> for MethodError {
    fn from(error: JsonRpcError) -> Self {
        MethodError::Rpc(error)
    }
}

impl From<CallError> for MethodError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Failed(e) => MethodError::Failed(e),
            other => MethodError::Rpc(JsonRpcError::invalid_params(other.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: String,
    #[serde(default)]
    client_info: Option<Value>,
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct PromptGetParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// Stateful MCP server behind the gateway.
pub struct McpEngine {
    info: ServerInfo,
    tools: Toolbox,
    sessions: Arc<SessionStore>,
}

impl McpEngine {
    pub fn new(config: &GatewayConfig, tools: Toolbox) -> Self {
        Self {
            info: ServerInfo::from_config(config),
            tools,
            sessions: Arc::new(SessionStore::new()),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// `POST /mcp`: one message or a batch, answered in the response body.
    async fn handle_streamable(
        &self,
        request: Request,
        caller: &CallerIdentity,
    ) -> anyhow::Result<Response> {
        let (parts, body) = request.into_parts();
        let parsed = match read_messages(body).await {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        };

        if parsed.contains_initialize() {
            if parsed.items.len() > 1 {
                return Ok(rpc_error(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: initialize must be sent on its own",
                ));
            }
            return self.open_session(parsed, caller).await;
        }

        let Some(id) = session_header(&parts.headers) else {
            return Ok(rpc_error(
                StatusCode::BAD_REQUEST,
                SESSION_REQUIRED,
                "Bad Request: Mcp-Session-Id header is required",
            ));
        };
        let Some(session) = self.sessions.get(id, caller).await else {
            return Ok(rpc_error(
                StatusCode::NOT_FOUND,
                SESSION_NOT_FOUND,
                "Session not found",
            ));
        };

        let expects_response = parsed.expects_response();
        let is_batch = parsed.is_batch;
        let mut responses = self.process(parsed, &session).await?;

        let mut response = if !expects_response {
            StatusCode::ACCEPTED.into_response()
        } else if is_batch {
            Json(responses).into_response()
        } else {
            match responses.pop() {
                Some(single) => Json(single).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            }
        };

        if let Ok(value) = HeaderValue::from_str(&session.id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        Ok(response)
    }

    /// Runs a lone `initialize`. The session is only kept, and its id only
    /// sent back, when initialization succeeds.
    async fn open_session(
        &self,
        parsed: ParsedBody,
        caller: &CallerIdentity,
    ) -> anyhow::Result<Response> {
        let mut session = Session::new(caller, None);
        let is_batch = parsed.is_batch;
        let Some(reply) = self.process(parsed, &session).await?.pop() else {
            return Ok(StatusCode::ACCEPTED.into_response());
        };

        let succeeded = reply.error.is_none();
        if succeeded {
            session.protocol_version = reply
                .result
                .as_ref()
                .and_then(|result| result.get("protocolVersion"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let mut response = if is_batch {
            Json(vec![reply]).into_response()
        } else {
            Json(reply).into_response()
        };
        if !succeeded {
            return Ok(response);
        }

        if let Ok(value) = HeaderValue::from_str(&session.id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        self.sessions.insert(session).await;
        Ok(response)
    }

    /// `GET /sse`: opens a session whose answers are pushed as events.
    async fn open_event_stream(&self, caller: &CallerIdentity) -> Response {
        let (events, receiver) = mpsc::channel::<Value>(EVENT_BUFFER);
        let session = self.sessions.create(caller, Some(events)).await;

        let endpoint = Event::default()
            .event("endpoint")
            .data(format!("/message?sessionId={}", session.id));
        let guard = self.sessions.guard(&session.id);
        let messages = ReceiverStream::new(receiver).map(move |message| {
            let _held = &guard;
            Event::default().event("message").json_data(message)
        });
        let stream = tokio_stream::once(Ok(endpoint)).chain(messages);

        Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response()
    }

    /// `POST /message?sessionId=<id>`: answers go to the session's stream.
    async fn handle_message(
        &self,
        request: Request,
        caller: &CallerIdentity,
    ) -> anyhow::Result<Response> {
        let Some(session_id) = query_session_id(request.uri().query()) else {
            return Ok((StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response());
        };
        let Some(session) = self.sessions.get(&session_id, caller).await else {
            return Ok((StatusCode::NOT_FOUND, "Session not found").into_response());
        };
        let Some(events) = session.events.clone() else {
            return Ok((
                StatusCode::BAD_REQUEST,
                "Session is not bound to an event stream",
            )
                .into_response());
        };

        let parsed = match read_messages(request.into_body()).await {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        };
        let is_batch = parsed.is_batch;
        let responses = self.process(parsed, &session).await?;

        if let Some(first) = responses.first() {
            let message = if is_batch {
                serde_json::to_value(&responses)?
            } else {
                serde_json::to_value(first)?
            };
            if events.send(message).await.is_err() {
                self.sessions.discard(&session.id).await;
                return Ok((StatusCode::NOT_FOUND, "Session not found").into_response());
            }
        }

        Ok((StatusCode::ACCEPTED, "Accepted").into_response())
    }

    /// `DELETE` with `Mcp-Session-Id`: ends the session.
    async fn close_session(&self, headers: &HeaderMap, caller: &CallerIdentity) -> Response {
        let Some(id) = session_header(headers) else {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                SESSION_REQUIRED,
                "Bad Request: Mcp-Session-Id header is required",
            );
        };
        if self.sessions.remove(id, caller).await {
            StatusCode::OK.into_response()
        } else {
            rpc_error(StatusCode::NOT_FOUND, SESSION_NOT_FOUND, "Session not found")
        }
    }

    async fn process(
        &self,
        parsed: ParsedBody,
        session: &Session,
    ) -> anyhow::Result<Vec<JsonRpcResponse>> {
        let mut responses = Vec::new();
        for item in parsed.items {
            match item {
                BatchItem::Request(request) => {
                    if let Some(response) = self.handle_request(request, session).await? {
                        responses.push(response);
                    }
                }
                BatchItem::ClientResponse => {}
                BatchItem::Invalid { id, error } => {
                    responses.push(JsonRpcResponse::failure(id, error));
                }
            }
        }
        Ok(responses)
    }

    /// Runs one request. Data-service faults abort the whole call; any other
    /// failure becomes a JSON-RPC error.
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        session: &Session,
    ) -> anyhow::Result<Option<JsonRpcResponse>> {
        let outcome = match self.call_method(&request, session).await {
            Ok(result) => Ok(result),
            Err(MethodError::Rpc(error)) => Err(error),
            Err(MethodError::Failed(e)) if is_fatal(&e) => {
                return Err(e.context(format!("{} failed", request.method)));
            }
            Err(MethodError::Failed(e)) => {
                tracing::error!("{} failed: {:#}", request.method, e);
                Err(JsonRpcError::new(INTERNAL_ERROR, "Internal error"))
            }
        };

        if request.is_notification() {
            if let Err(error) = outcome {
                tracing::debug!("ignoring failed notification {}: {}", request.method, error.message);
            }
            return Ok(None);
        }

        Ok(Some(match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        }))
    }

    async fn call_method(
        &self,
        request: &JsonRpcRequest,
        session: &Session,
    ) -> Result<Value, MethodError> {
        let params = request.params.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            "initialize" => self.initialize(params, session).await,
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools.definitions() })),
            "tools/call" => {
                let params: ToolCallParams = from_params(params)?;
                let arguments = params.arguments.unwrap_or_else(|| json!({}));
                Ok(self.tools.call(&params.name, arguments).await?)
            }
            "prompts/list" => Ok(json!({ "prompts": prompts::definitions() })),
            "prompts/get" => {
                let params: PromptGetParams = from_params(params)?;
                Ok(prompts::get(&params.name, &params.arguments)?)
            }
            method if method.starts_with("notifications/") => Ok(Value::Null),
            method => Err(JsonRpcError::method_not_found(method).into()),
        }
    }

    async fn initialize(&self, params: Value, session: &Session) -> Result<Value, MethodError> {
        let params: InitializeParams = from_params(params)?;
        let version = PROTOCOL_VERSIONS
            .iter()
            .copied()
            .find(|supported| *supported == params.protocol_version)
            .unwrap_or(PROTOCOL_VERSIONS[0]);

        self.sessions.set_protocol_version(&session.id, version).await;
        let client = params
            .client_info
            .as_ref()
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(
            "session {} initialized with protocol {} (client {})",
            session.id,
            version,
            client
        );

        Ok(json!({
            "protocolVersion": version,
            "capabilities": { "tools": {}, "prompts": {} },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version,
                "title": self.info.title,
                "description": format!("{} - Model Context Protocol server", self.info.title),
            },
            "instructions": SERVER_INSTRUCTIONS,
        }))
    }
}

#[async_trait]
impl ProtocolEngine for McpEngine {
    async fn handle(
        &self,
        request: Request,
        caller: &CallerIdentity,
    ) -> anyhow::Result<Option<Response>> {
        let path = request.uri().path().to_string();
        let method = request.method().clone();

        let response = match path.as_str() {
            "/" | "/mcp" | "/sse" | "/message" if method == Method::DELETE => {
                self.close_session(request.headers(), caller).await
            }
            "/" | "/mcp" if method == Method::POST => self.handle_streamable(request, caller).await?,
            "/" | "/mcp" => method_not_allowed("POST, DELETE"),
            "/sse" if method == Method::GET => self.open_event_stream(caller).await,
            "/sse" => method_not_allowed("GET, DELETE"),
            "/message" if method == Method::POST => self.handle_message(request, caller).await?,
            "/message" => method_not_allowed("POST, DELETE"),
            _ => StatusCode::NOT_FOUND.into_response(),
        };

        Ok(Some(response))
    }
}

fn is_fatal(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<mcp_gate::Error>(),
        Some(mcp_gate::Error::ServicesNotInitialized)
    )
}

fn from_params<T: DeserializeOwned>(params: Value) -> Result<T, MethodError> {
    serde_json::from_value(params)
        .map_err(|e| MethodError::Rpc(JsonRpcError::invalid_params(format!("Invalid params: {}", e))))
}

async fn read_messages(body: Body) -> Result<ParsedBody, Response> {
    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        tracing::warn!("failed to read request body: {}", e);
        rpc_error(
            StatusCode::BAD_REQUEST,
            PARSE_ERROR,
            "Parse error: unable to read request body",
        )
    })?;
    parse_body(&bytes).map_err(|error| (StatusCode::BAD_REQUEST, Json(error)).into_response())
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn query_session_id(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "sessionId")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (
        status,
        Json(JsonRpcResponse::failure(None, JsonRpcError::new(code, message))),
    )
        .into_response()
}

fn method_not_allowed(allow: &'static str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, allow)],
        "Method Not Allowed",
    )
        .into_response()
}
