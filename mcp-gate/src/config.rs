use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Issuer used when none is configured. Tokens can never be discovered
/// against it, so no `WWW-Authenticate` challenge is advertised for it.
pub const DEFAULT_ISSUER: &str = "http://localhost:3000";

/// Key set location paired with [`DEFAULT_ISSUER`].
pub const DEFAULT_JWKS_URL: &str = "http://localhost:3000/.well-known/jwks.json";

/// Path of the RFC 9728 protected resource metadata document.
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: String, reason: String },

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError { name: String, reason: String },

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Token verification settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected `iss` claim, compared verbatim
    pub issuer: String,

    /// Remote key set used to verify signed tokens
    pub jwks_url: Url,

    /// Accepted `aud` values; a token must carry at least one of them
    pub audiences: Vec<String>,

    /// Skip authentication and treat every caller as the development user
    pub skip: bool,

    /// Upper bound for key set fetches and opaque token callbacks
    pub verify_timeout: Option<Duration>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            jwks_url: Url::parse(DEFAULT_JWKS_URL).expect("valid url"),
            audiences: vec![DEFAULT_ISSUER.to_string()],
            skip: false,
            verify_timeout: None,
        }
    }
}

impl AuthConfig {
    /// Whether a real authorization server is configured.
    pub fn has_discovery(&self) -> bool {
        self.issuer != DEFAULT_ISSUER
    }

    /// Discovery URL clients can dereference to learn how to get a token.
    pub fn resource_metadata_url(&self) -> String {
        format!("{}{}", self.issuer, PROTECTED_RESOURCE_PATH)
    }
}

/// Process-wide gateway configuration, immutable once loaded.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Server name displayed to clients
    pub server_name: String,

    /// Server version
    pub server_version: String,

    /// Whether running in production
    pub is_production: bool,

    /// Listen port; also used for the non-production resource URL
    pub port: u16,

    /// Token verification settings
    pub auth: AuthConfig,

    /// Optional session persistence backend
    pub redis_url: Option<String>,

    /// Upper bound for a single protocol engine call
    pub engine_timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new("MCP Server")
    }
}

impl GatewayConfig {
    /// Create a new configuration with local development defaults
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            server_version: "1.0.0".to_string(),
            is_production: false,
            port: 3000,
            auth: AuthConfig::default(),
            redis_url: None,
            engine_timeout: None,
        }
    }

    /// Loads configuration from environment variables with validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let issuer = var("AUTH_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string());
        let jwks_url = parse_url(
            "AUTH_JWKS_URL",
            &var("AUTH_JWKS_URL").unwrap_or_else(|| DEFAULT_JWKS_URL.to_string()),
        )?;
        let audiences =
            parse_list(&var("AUTH_AUDIENCES").unwrap_or_else(|| DEFAULT_ISSUER.to_string()));
        if audiences.is_empty() {
            return Err(ConfigError::MissingRequired("AUTH_AUDIENCES".to_string()));
        }

        let config = Self {
            server_name: var("MCP_SERVER_NAME").unwrap_or_else(|| "MCP Server".to_string()),
            server_version: var("MCP_SERVER_VERSION").unwrap_or_else(|| "1.0.0".to_string()),
            is_production: var("MCP_ENVIRONMENT").as_deref() == Some("production"),
            port: parse_number("PORT", var("PORT"))?.unwrap_or(3000),
            auth: AuthConfig {
                issuer,
                jwks_url,
                audiences,
                skip: var("AUTH_SKIP").as_deref() == Some("true"),
                verify_timeout: parse_millis("AUTH_VERIFY_TIMEOUT_MS", var("AUTH_VERIFY_TIMEOUT_MS"))?,
            },
            redis_url: var("REDIS_URL"),
            engine_timeout: parse_millis("MCP_ENGINE_TIMEOUT_MS", var("MCP_ENGINE_TIMEOUT_MS"))?,
        };

        Ok(config)
    }

    /// Set server version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Mark the deployment as production
    pub fn with_production(mut self, is_production: bool) -> Self {
        self.is_production = is_production;
        self
    }

    /// Set listen port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the expected token issuer
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.auth.issuer = issuer.into();
        self
    }

    /// Set the key set URL
    pub fn with_jwks_url(mut self, url: Url) -> Self {
        self.auth.jwks_url = url;
        self
    }

    /// Set accepted audiences
    pub fn with_audiences<I, A>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.auth.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable the development auth bypass
    pub fn with_auth_skip(mut self, skip: bool) -> Self {
        self.auth.skip = skip;
        self
    }

    /// Bound key set fetches and opaque token callbacks
    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.auth.verify_timeout = Some(timeout);
        self
    }

    /// Bound protocol engine calls
    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = Some(timeout);
        self
    }

    /// Server name as an identifier: lowercase, whitespace runs replaced by `-`.
    pub fn server_slug(&self) -> String {
        self.server_name
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_millis(name: &str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    match parse_number::<u64>(name, value)? {
        Some(0) => Err(ConfigError::ParseError {
            name: name.to_string(),
            reason: "timeout must be greater than 0".to_string(),
        }),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_local_development() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_name, "MCP Server");
        assert_eq!(config.server_version, "1.0.0");
        assert!(!config.is_production);
        assert_eq!(config.port, 3000);
        assert_eq!(config.auth.issuer, DEFAULT_ISSUER);
        assert_eq!(config.auth.jwks_url.as_str(), DEFAULT_JWKS_URL);
        assert_eq!(config.auth.audiences, vec![DEFAULT_ISSUER.to_string()]);
        assert!(!config.auth.skip);
        assert!(config.auth.verify_timeout.is_none());
        assert!(config.engine_timeout.is_none());
        assert!(config.redis_url.is_none());
        assert!(!config.auth.has_discovery());
    }

    #[test]
    fn audiences_are_split_and_trimmed() {
        let config = load(&[("AUTH_AUDIENCES", " https://a.example , https://b.example,,")]).unwrap();
        assert_eq!(
            config.auth.audiences,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn empty_audience_list_is_rejected() {
        let err = load(&[("AUTH_AUDIENCES", " , ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
    }

    #[test]
    fn only_literal_true_enables_skip() {
        assert!(load(&[("AUTH_SKIP", "true")]).unwrap().auth.skip);
        assert!(!load(&[("AUTH_SKIP", "1")]).unwrap().auth.skip);
        assert!(!load(&[("AUTH_SKIP", "TRUE")]).unwrap().auth.skip);
    }

    #[test]
    fn invalid_jwks_url_is_rejected() {
        let err = load(&[("AUTH_JWKS_URL", "not a url")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn timeouts_parse_as_millis() {
        let config = load(&[
            ("AUTH_VERIFY_TIMEOUT_MS", "2500"),
            ("MCP_ENGINE_TIMEOUT_MS", "60000"),
        ])
        .unwrap();
        assert_eq!(config.auth.verify_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.engine_timeout, Some(Duration::from_secs(60)));

        assert!(load(&[("AUTH_VERIFY_TIMEOUT_MS", "0")]).is_err());
        assert!(load(&[("MCP_ENGINE_TIMEOUT_MS", "soon")]).is_err());
    }

    #[test]
    fn custom_issuer_enables_discovery() {
        let config = load(&[
            ("AUTH_ISSUER", "https://auth.example.com"),
            ("MCP_ENVIRONMENT", "production"),
            ("REDIS_URL", "redis://localhost:6379"),
        ])
        .unwrap();
        assert!(config.is_production);
        assert!(config.auth.has_discovery());
        assert_eq!(
            config.auth.resource_metadata_url(),
            "https://auth.example.com/.well-known/oauth-protected-resource"
        );
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn server_slug_collapses_whitespace() {
        let config = GatewayConfig::new("My  Notes\tServer");
        assert_eq!(config.server_slug(), "my-notes-server");
    }
}
