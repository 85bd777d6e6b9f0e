//! Bearer token classification and verification.

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::jwks::{KeySetProvider, is_supported_algorithm};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Clock skew tolerated on `exp` and `nbf`, in seconds.
pub const CLOCK_SKEW_SECS: u64 = 60;

/// Shape of a bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Three dot-separated segments; checked locally against the key set.
    Structured,
    /// Anything else; resolved by an external callback.
    Opaque,
}

/// Picks a verification strategy from the token's shape alone.
pub fn classify(token: &str) -> TokenKind {
    if token.matches('.').count() == 2 {
        TokenKind::Structured
    } else {
        TokenKind::Opaque
    }
}

/// Resolves opaque reference tokens, e.g. through an introspection endpoint.
///
/// `Ok(Some(subject))` accepts the token, `Ok(None)` rejects it. An `Err`
/// also rejects it and is logged.
#[async_trait]
pub trait OpaqueTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<Option<String>>;
}

#[async_trait]
impl<F, Fut> OpaqueTokenVerifier for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
{
    async fn verify(&self, token: &str) -> anyhow::Result<Option<String>> {
        (self)(token.to_string()).await
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Turns a raw bearer credential into a verified subject.
pub struct TokenVerifier {
    issuer: String,
    audiences: Vec<String>,
    jwks_url: Url,
    key_sets: Arc<KeySetProvider>,
    opaque: Option<Arc<dyn OpaqueTokenVerifier>>,
    timeout: Option<Duration>,
}

impl TokenVerifier {
    pub fn new(auth: &AuthConfig, key_sets: Arc<KeySetProvider>) -> Self {
        Self {
            issuer: auth.issuer.clone(),
            audiences: auth.audiences.clone(),
            jwks_url: auth.jwks_url.clone(),
            key_sets,
            opaque: None,
            timeout: auth.verify_timeout,
        }
    }

    /// Register the callback used for opaque tokens. Without one every
    /// opaque token is rejected.
    pub fn with_opaque_verifier(mut self, verifier: Arc<dyn OpaqueTokenVerifier>) -> Self {
        self.opaque = Some(verifier);
        self
    }

    #[cfg(test)]
    pub(crate) fn key_sets_initialized(&self) -> bool {
        self.key_sets.is_initialized()
    }

    /// Returns the token's subject, or the reason it was rejected.
    pub async fn verify(&self, token: &str) -> Result<String> {
        let kind = classify(token);
        let result = match kind {
            TokenKind::Structured => self.verify_structured(token).await,
            TokenKind::Opaque => self.verify_opaque(token).await,
        };

        if let Err(e) = &result {
            tracing::warn!("{:?} token verification failed: {}", kind, e);
        }

        result
    }

    async fn verify_structured(&self, token: &str) -> Result<String> {
        let header = decode_header(token).map_err(|e| Error::InvalidJwt(e.to_string()))?;
        if !is_supported_algorithm(header.alg) {
            return Err(Error::InvalidJwt(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }

        let key_set = self.key_sets.key_set(&self.jwks_url);
        let keys = key_set.keys_for(header.kid.as_deref(), header.alg).await?;
        let validation = self.validation(header.alg);

        let mut last_error = None;
        for key in &keys {
            match decode::<Claims>(token, key, &validation) {
                Ok(data) if data.claims.sub.is_empty() => {
                    return Err(Error::InvalidJwt("empty subject".to_string()));
                }
                Ok(data) => return Ok(data.claims.sub),
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::InvalidJwt(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate key".to_string()),
        ))
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = CLOCK_SKEW_SECS;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&self.audiences);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }

    async fn verify_opaque(&self, token: &str) -> Result<String> {
        let verifier = self.opaque.as_ref().ok_or(Error::OpaqueTokensUnsupported)?;

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, verifier.verify(token))
                .await
                .map_err(|_| Error::Timeout("opaque token verifier".to_string()))?,
            None => verifier.verify(token).await,
        };

        match outcome {
            Ok(Some(subject)) if !subject.is_empty() => Ok(subject),
            Ok(_) => Err(Error::InvalidToken),
            Err(e) => {
                tracing::warn!("opaque token verifier failed: {:#}", e);
                Err(Error::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_dots_is_structured() {
        assert_eq!(classify("a.b.c"), TokenKind::Structured);
        assert_eq!(classify(".."), TokenKind::Structured);
        assert_eq!(classify("eyJhbGciOiJFUzI1NiJ9.e30.sig"), TokenKind::Structured);
    }

    #[test]
    fn anything_else_is_opaque() {
        assert_eq!(classify("abc"), TokenKind::Opaque);
        assert_eq!(classify("a.b"), TokenKind::Opaque);
        assert_eq!(classify("a.b.c.d"), TokenKind::Opaque);
        assert_eq!(classify(""), TokenKind::Opaque);
    }

    fn verifier() -> TokenVerifier {
        let key_sets = Arc::new(KeySetProvider::new(None).unwrap());
        TokenVerifier::new(&AuthConfig::default(), key_sets)
    }

    #[tokio::test]
    async fn opaque_without_callback_fails_closed() {
        let err = verifier().verify("opaque-token").await.unwrap_err();
        assert!(matches!(err, Error::OpaqueTokensUnsupported));
    }

    #[tokio::test]
    async fn opaque_callback_decides() {
        let verifier = verifier().with_opaque_verifier(Arc::new(|token: String| async move {
            match token.as_str() {
                "good" => Ok(Some("user-42".to_string())),
                "broken" => Err(anyhow::anyhow!("introspection endpoint down")),
                _ => Ok(None),
            }
        }));

        assert_eq!(verifier.verify("good").await.unwrap(), "user-42");
        assert!(matches!(
            verifier.verify("bad").await.unwrap_err(),
            Error::InvalidToken
        ));
        assert!(matches!(
            verifier.verify("broken").await.unwrap_err(),
            Error::InvalidToken
        ));
    }

    #[tokio::test]
    async fn slow_opaque_callback_times_out() {
        let auth = AuthConfig {
            verify_timeout: Some(Duration::from_millis(20)),
            ..AuthConfig::default()
        };
        let key_sets = Arc::new(KeySetProvider::new(None).unwrap());
        let verifier = TokenVerifier::new(&auth, key_sets).with_opaque_verifier(Arc::new(
            |_token: String| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(Some("late".to_string()))
            },
        ));

        let err = verifier.verify("slow").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn shared_secret_tokens_are_rejected_without_fetching() {
        // {"alg":"HS256","typ":"JWT"}.{"sub":"x"}.sig
        let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiJ4In0.c2ln";
        let verifier = verifier();
        let err = verifier.verify(token).await.unwrap_err();
        assert!(matches!(err, Error::InvalidJwt(_)));
        assert!(!verifier.key_sets.is_initialized());
    }
}
