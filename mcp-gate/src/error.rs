use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    // Credential errors
    MissingCredentials,
    MalformedCredentials,
    InvalidJwt(String),
    OpaqueTokensUnsupported,
    InvalidToken,

    // Key set errors
    KeySetUnavailable(String),
    KeyNotFound(String),

    // Upstream call exceeded its configured budget
    Timeout(String),

    // Service layer errors
    ServicesNotInitialized,
    StorageError(String),

    // Generic errors
    InvalidRequest(String),
    Internal(String),
}

impl Error {
    /// Whether this error means "the caller is not authenticated".
    ///
    /// Key set and timeout failures count: an unreachable dependency during
    /// verification rejects the request, it never faults the process.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::MissingCredentials
                | Error::MalformedCredentials
                | Error::InvalidJwt(_)
                | Error::OpaqueTokensUnsupported
                | Error::InvalidToken
                | Error::KeySetUnavailable(_)
                | Error::KeyNotFound(_)
                | Error::Timeout(_)
        )
    }

    /// Short reason sent as the body of a 401 response.
    pub fn unauthorized_reason(&self) -> &'static str {
        match self {
            Error::MissingCredentials | Error::MalformedCredentials => "Unauthorized",
            Error::InvalidJwt(_) | Error::KeySetUnavailable(_) | Error::KeyNotFound(_) => {
                "Unauthorized - invalid or expired JWT"
            }
            Error::OpaqueTokensUnsupported => "Unauthorized - opaque tokens not supported",
            _ => "Unauthorized - invalid token",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingCredentials => write!(f, "missing Authorization header"),
            Error::MalformedCredentials => write!(f, "malformed Authorization header"),
            Error::InvalidJwt(msg) => write!(f, "invalid JWT: {}", msg),
            Error::OpaqueTokensUnsupported => write!(f, "opaque tokens not supported"),
            Error::InvalidToken => write!(f, "invalid token"),
            Error::KeySetUnavailable(msg) => write!(f, "key set unavailable: {}", msg),
            Error::KeyNotFound(kid) => write!(f, "no matching key in key set: {}", kid),
            Error::Timeout(what) => write!(f, "timed out: {}", what),
            Error::ServicesNotInitialized => write!(
                f,
                "services not initialized: bind the service handle before use"
            ),
            Error::StorageError(msg) => write!(f, "storage error: {}", msg),
            Error::InvalidRequest(msg) => write!(f, "invalid_request: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

// axum IntoResponse implementation
#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        if self.is_auth_failure() {
            return (StatusCode::UNAUTHORIZED, self.unauthorized_reason()).into_response();
        }

        let status = match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
