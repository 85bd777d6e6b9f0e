//! Shared helpers: an ES256 test issuer and a wiremock key set endpoint.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ISSUER: &str = "https://auth.example.com";
pub const AUDIENCE: &str = "https://mcp.example.com";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Signs tokens with a fresh P-256 key and publishes the matching JWK.
pub struct TestIssuer {
    pub kid: String,
    encoding_key: EncodingKey,
    jwk: Value,
}

impl TestIssuer {
    pub fn new(kid: &str) -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let der = signing_key.to_pkcs8_der().expect("pkcs8 encoding");
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        let point = signing_key.verifying_key().to_encoded_point(false);
        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "kid": kid,
            "use": "sig",
            "alg": "ES256",
            "x": URL_SAFE_NO_PAD.encode(point.x().expect("x coordinate")),
            "y": URL_SAFE_NO_PAD.encode(point.y().expect("y coordinate")),
        });

        Self {
            kid: kid.to_string(),
            encoding_key,
            jwk,
        }
    }

    pub fn jwk(&self) -> Value {
        self.jwk.clone()
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key).expect("token signs")
    }

    /// Token for `sub` with the default issuer and audience, expiring
    /// `exp_offset` seconds from now.
    pub fn token(&self, sub: &str, exp_offset: i64) -> String {
        self.sign(&claims(ISSUER, json!(AUDIENCE), sub, exp_offset))
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn claims(iss: &str, aud: Value, sub: &str, exp_offset: i64) -> Value {
    let now = now();
    json!({
        "iss": iss,
        "aud": aud,
        "sub": sub,
        "iat": now,
        "exp": now + exp_offset,
    })
}

pub fn jwks(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}

/// Serves `keys` at [`JWKS_PATH`] and returns the full key set URL.
pub async fn serve_jwks(server: &MockServer, keys: &[Value]) -> url::Url {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
        .mount(server)
        .await;
    jwks_url(server)
}

pub fn jwks_url(server: &MockServer) -> url::Url {
    url::Url::parse(&format!("{}{}", server.uri(), JWKS_PATH)).expect("mock server url")
}
