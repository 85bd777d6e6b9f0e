//! Transport dispatch to the protocol engine.

use crate::auth::CallerIdentity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode, Uri, header::ACCESS_CONTROL_ALLOW_ORIGIN},
    response::{IntoResponse, Response},
};
use std::time::Duration;

/// Internal path every streamable-HTTP request is served on.
pub const PROTOCOL_PATH: &str = "/mcp";

/// The stateful protocol handler behind the gateway.
///
/// Gets the request exactly as the client sent it, apart from path
/// normalization, plus the authenticated caller. `Ok(None)` means the
/// engine produced no response, which the dispatcher treats as a failure.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    async fn handle(
        &self,
        request: Request,
        caller: &CallerIdentity,
    ) -> anyhow::Result<Option<Response>>;
}

/// Moves a request onto [`PROTOCOL_PATH`], keeping its method, headers,
/// query string, extensions and body.
pub fn rewrite_to_protocol_path(request: Request) -> Result<Request> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", PROTOCOL_PATH, query),
        None => PROTOCOL_PATH.to_string(),
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.path_and_query = Some(
        path_and_query
            .parse()
            .map_err(|e| Error::InvalidRequest(format!("invalid request target: {}", e)))?,
    );
    parts.uri = Uri::from_parts(uri_parts)
        .map_err(|e| Error::InvalidRequest(format!("invalid request target: {}", e)))?;

    Ok(Request::from_parts(parts, body))
}

/// Hands a request to the engine, converting every failure into a generic
/// 500 that still carries permissive CORS headers.
pub async fn dispatch<E>(
    engine: &E,
    request: Request,
    caller: &CallerIdentity,
    timeout: Option<Duration>,
) -> Response
where
    E: ProtocolEngine + ?Sized,
{
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, engine.handle(request, caller)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("protocol engine timed out after {:?}", limit)),
        },
        None => engine.handle(request, caller).await,
    };

    match outcome {
        Ok(Some(response)) => response,
        Ok(None) => {
            tracing::error!("protocol engine returned no response for {} {}", method, path);
            internal_error()
        }
        Err(e) => {
            tracing::error!("protocol engine failed for {} {}: {:#}", method, path, e);
            internal_error()
        }
    }
}

/// Generic 500 with `Access-Control-Allow-Origin: *`.
pub fn internal_error() -> Response {
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};

    #[test]
    fn rewrite_keeps_query_method_and_headers() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/?sessionId=abc&x=1")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let rewritten = rewrite_to_protocol_path(request).unwrap();
        assert_eq!(rewritten.method(), Method::POST);
        assert_eq!(rewritten.uri().path(), "/mcp");
        assert_eq!(rewritten.uri().query(), Some("sessionId=abc&x=1"));
        assert_eq!(rewritten.headers()["content-type"], "application/json");
    }

    #[test]
    fn rewrite_without_query_has_none() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let rewritten = rewrite_to_protocol_path(request).unwrap();
        assert_eq!(rewritten.uri().to_string(), "/mcp");
    }

    #[test]
    fn rewrite_keeps_absolute_authority() {
        let request = Request::builder()
            .uri("http://gateway.local:3000/?a=b")
            .body(Body::empty())
            .unwrap();
        let rewritten = rewrite_to_protocol_path(request).unwrap();
        assert_eq!(rewritten.uri().to_string(), "http://gateway.local:3000/mcp?a=b");
    }

    #[test]
    fn internal_error_is_cors_friendly() {
        let response = internal_error();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
