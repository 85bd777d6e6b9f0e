//! Remote key set cache.
//!
//! Verification keys are fetched from the configured key set URL on first
//! use and kept in memory. The cache re-fetches when it is older than its
//! max age, or when a token names a key id the cache does not know and the
//! last fetch is older than the cooldown.

use crate::error::{Error, Result};
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use url::Url;

/// How long a fetched key set is trusted before it is fetched again.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Minimum spacing between re-fetches triggered by an unknown key id.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Key family a signing algorithm needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    P256,
    P384,
    Ed25519,
}

impl KeyFamily {
    /// Only asymmetric algorithms have a family; shared-secret algorithms
    /// cannot be verified against a published key set.
    fn for_algorithm(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
            Algorithm::ES256 => Some(KeyFamily::P256),
            Algorithm::ES384 => Some(KeyFamily::P384),
            Algorithm::EdDSA => Some(KeyFamily::Ed25519),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
        }
    }

    fn for_jwk(jwk: &Jwk) -> Option<Self> {
        match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => Some(KeyFamily::Rsa),
            AlgorithmParameters::EllipticCurve(params) => match params.curve {
                EllipticCurve::P256 => Some(KeyFamily::P256),
                EllipticCurve::P384 => Some(KeyFamily::P384),
                _ => None,
            },
            AlgorithmParameters::OctetKeyPair(params) => match params.curve {
                EllipticCurve::Ed25519 => Some(KeyFamily::Ed25519),
                _ => None,
            },
            AlgorithmParameters::OctetKey(_) => None,
        }
    }
}

/// Whether `alg` can be checked against a remote key set.
pub fn is_supported_algorithm(alg: Algorithm) -> bool {
    KeyFamily::for_algorithm(alg).is_some()
}

struct KeyEntry {
    kid: Option<String>,
    family: KeyFamily,
    key: DecodingKey,
}

struct CachedKeySet {
    keys: Vec<KeyEntry>,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn select(&self, kid: Option<&str>, family: KeyFamily) -> Vec<DecodingKey> {
        self.keys
            .iter()
            .filter(|entry| entry.family == family)
            .filter(|entry| match kid {
                Some(kid) => entry.kid.as_deref() == Some(kid),
                None => true,
            })
            .map(|entry| entry.key.clone())
            .collect()
    }
}

/// Keys published at one URL, fetched on demand.
pub struct RemoteKeySet {
    url: Url,
    client: reqwest::Client,
    cache: RwLock<Option<Arc<CachedKeySet>>>,
    max_age: Duration,
    cooldown: Duration,
}

impl RemoteKeySet {
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        Self {
            url,
            client,
            cache: RwLock::new(None),
            max_age: DEFAULT_MAX_AGE,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_policy(mut self, max_age: Duration, cooldown: Duration) -> Self {
        self.max_age = max_age;
        self.cooldown = cooldown;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns every cached key that could have signed a token with this
    /// header, in key set order.
    pub async fn keys_for(&self, kid: Option<&str>, alg: Algorithm) -> Result<Vec<DecodingKey>> {
        let family = KeyFamily::for_algorithm(alg)
            .ok_or_else(|| Error::InvalidJwt(format!("unsupported algorithm {:?}", alg)))?;

        let max_age = self.max_age;
        let cached = self
            .load(|cached| cached.fetched_at.elapsed() >= max_age)
            .await?;

        let keys = cached.select(kid, family);
        if !keys.is_empty() {
            return Ok(keys);
        }

        if let Some(kid) = kid {
            let cooldown = self.cooldown;
            if cached.fetched_at.elapsed() >= cooldown {
                tracing::debug!("unknown key id {}, re-fetching key set", kid);
                let refreshed = self
                    .load(|cached| cached.fetched_at.elapsed() >= cooldown)
                    .await?;
                let keys = refreshed.select(Some(kid), family);
                if !keys.is_empty() {
                    return Ok(keys);
                }
            }
        }

        Err(Error::KeyNotFound(
            kid.map(str::to_string)
                .unwrap_or_else(|| format!("no {:?} key", alg)),
        ))
    }

    /// Returns the cached set, fetching first when there is none or when
    /// `needs_refresh` says the current one is not good enough.
    async fn load<F>(&self, needs_refresh: F) -> Result<Arc<CachedKeySet>>
    where
        F: Fn(&CachedKeySet) -> bool,
    {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if !needs_refresh(cached) {
                    return Ok(cached.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if !needs_refresh(cached) {
                return Ok(cached.clone());
            }
        }

        let fetched = Arc::new(self.fetch().await?);
        *cache = Some(fetched.clone());
        Ok(fetched)
    }

    async fn fetch(&self) -> Result<CachedKeySet> {
        tracing::debug!("fetching key set from {}", self.url);

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                tracing::error!("key set fetch from {} failed: {}", self.url, e);
                Error::KeySetUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                "key set fetch from {} returned status {}",
                self.url,
                response.status()
            );
            return Err(Error::KeySetUnavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::KeySetUnavailable(format!("invalid key set body: {}", e)))?;

        let raw_keys = body
            .get("keys")
            .and_then(|k| k.as_array())
            .ok_or_else(|| Error::KeySetUnavailable("key set has no keys array".to_string()))?;

        let keys: Vec<KeyEntry> = raw_keys.iter().filter_map(parse_key).collect();

        tracing::info!(
            "fetched key set from {}: {} usable of {} keys",
            self.url,
            keys.len(),
            raw_keys.len()
        );

        Ok(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        })
    }
}

/// Parses one published key, skipping anything that cannot verify signatures.
fn parse_key(raw: &serde_json::Value) -> Option<KeyEntry> {
    let jwk: Jwk = match serde_json::from_value(raw.clone()) {
        Ok(jwk) => jwk,
        Err(e) => {
            tracing::warn!("skipping unparseable key: {}", e);
            return None;
        }
    };

    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        tracing::warn!("skipping encryption key {:?}", jwk.common.key_id);
        return None;
    }

    let Some(family) = KeyFamily::for_jwk(&jwk) else {
        tracing::warn!("skipping key {:?} with unsupported type", jwk.common.key_id);
        return None;
    };

    match DecodingKey::from_jwk(&jwk) {
        Ok(key) => Some(KeyEntry {
            kid: jwk.common.key_id.clone(),
            family,
            key,
        }),
        Err(e) => {
            tracing::warn!("skipping key {:?}: {}", jwk.common.key_id, e);
            None
        }
    }
}

/// Process-scoped owner of the remote key set.
///
/// The first call to [`KeySetProvider::key_set`] constructs the fetcher;
/// every later call returns that same instance, whatever URL it passes.
pub struct KeySetProvider {
    cell: OnceLock<Arc<RemoteKeySet>>,
    client: reqwest::Client,
    max_age: Duration,
    cooldown: Duration,
}

impl KeySetProvider {
    /// `timeout` bounds each key set HTTP fetch.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            cell: OnceLock::new(),
            client,
            max_age: DEFAULT_MAX_AGE,
            cooldown: DEFAULT_COOLDOWN,
        })
    }

    /// Override the cache policy of the key set this provider will construct.
    pub fn with_policy(mut self, max_age: Duration, cooldown: Duration) -> Self {
        self.max_age = max_age;
        self.cooldown = cooldown;
        self
    }

    pub fn key_set(&self, url: &Url) -> Arc<RemoteKeySet> {
        self.cell
            .get_or_init(|| {
                tracing::debug!("creating remote key set for {}", url);
                Arc::new(
                    RemoteKeySet::new(url.clone(), self.client.clone())
                        .with_policy(self.max_age, self.cooldown),
                )
            })
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
