//! Auth gate for protocol endpoints.
//!
//! Extracts the bearer credential, verifies it and binds the resulting
//! [`CallerIdentity`] to the request. Failures become a 401 carrying the
//! challenge clients need to discover the authorization server.

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::token::TokenVerifier;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, WWW_AUTHENTICATE},
        request::Parts,
    },
    response::{IntoResponse, Response},
};
use std::fmt;
use std::sync::Arc;

/// Identity given to every caller when authentication is bypassed.
pub const DEV_USER: &str = "dev-user";

/// Subject of a verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    pub fn dev_user() -> Self {
        Self(DEV_USER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts a bearer token from an Authorization header value.
///
/// Only the exact `Bearer ` prefix is accepted, and the token must not be
/// empty.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

pub struct AuthGate {
    auth: AuthConfig,
    verifier: TokenVerifier,
}

impl AuthGate {
    pub fn new(auth: AuthConfig, verifier: TokenVerifier) -> Self {
        Self { auth, verifier }
    }

    pub fn bypass_enabled(&self) -> bool {
        self.auth.skip
    }

    /// Verifies the request's credential and returns who sent it.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity> {
        if self.auth.skip {
            return Ok(CallerIdentity::dev_user());
        }

        let header = headers
            .get(AUTHORIZATION)
            .ok_or(Error::MissingCredentials)?;
        let value = header.to_str().map_err(|_| Error::MalformedCredentials)?;
        let token = extract_bearer_token(value).ok_or(Error::MalformedCredentials)?;

        let subject = self.verifier.verify(token).await?;
        Ok(CallerIdentity(subject))
    }

    /// Builds the 401 response for a failed authentication.
    pub fn reject(&self, err: &Error) -> Response {
        tracing::info!("rejecting unauthenticated request: {}", err);

        let mut response = (StatusCode::UNAUTHORIZED, err.unauthorized_reason()).into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

        if self.auth.has_discovery() {
            let challenge = format!(
                "Bearer resource_metadata=\"{}\"",
                self.auth.resource_metadata_url()
            );
            match HeaderValue::from_str(&challenge) {
                Ok(value) => {
                    headers.insert(WWW_AUTHENTICATE, value);
                }
                Err(e) => tracing::error!("issuer does not fit in a header: {}", e),
            }
        }

        response
    }
}

/// Extractor for the authenticated caller.
///
/// Runs the gate unless an earlier extractor already bound an identity to
/// this request, in which case that identity is reused unchanged.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(Authenticated(caller): Authenticated) -> String {
///     format!("Hello, {}!", caller)
/// }
/// ```
pub struct Authenticated(pub CallerIdentity);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    Arc<AuthGate>: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<CallerIdentity>() {
            return Ok(Authenticated(caller.clone()));
        }

        let gate = Arc::<AuthGate>::from_ref(state);
        match gate.authenticate(&parts.headers).await {
            Ok(caller) => {
                parts.extensions.insert(caller.clone());
                Ok(Authenticated(caller))
            }
            Err(e) => Err(gate.reject(&e)),
        }
    }
}
