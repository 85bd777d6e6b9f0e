mod common;

use common::{AUDIENCE, ISSUER, JWKS_PATH, TestIssuer, claims, jwks, jwks_url, serve_jwks};
use mcp_gate::{AuthConfig, Error, KeySetProvider, TokenVerifier};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth_config(jwks_url: url::Url) -> AuthConfig {
    AuthConfig {
        issuer: ISSUER.to_string(),
        jwks_url,
        audiences: vec![AUDIENCE.to_string(), "https://other.example.com".to_string()],
        skip: false,
        verify_timeout: Some(Duration::from_secs(5)),
    }
}

fn verifier(jwks_url: url::Url) -> TokenVerifier {
    let config = auth_config(jwks_url);
    let key_sets = Arc::new(KeySetProvider::new(config.verify_timeout).unwrap());
    TokenVerifier::new(&config, key_sets)
}

#[tokio::test]
async fn valid_token_yields_subject() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;

    let subject = verifier(url).verify(&issuer.token("user-123", 300)).await.unwrap();
    assert_eq!(subject, "user-123");
}

#[tokio::test]
async fn issuer_mismatch_fails_despite_valid_signature() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;

    let token = issuer.sign(&claims("https://evil.example.com", json!(AUDIENCE), "user", 300));
    let err = verifier(url).verify(&token).await.unwrap_err();
    assert!(matches!(err, Error::InvalidJwt(_)));
    assert_eq!(err.unauthorized_reason(), "Unauthorized - invalid or expired JWT");
}

#[tokio::test]
async fn issuer_must_match_exactly() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;

    let token = issuer.sign(&claims(&format!("{}/", ISSUER), json!(AUDIENCE), "user", 300));
    assert!(verifier(url).verify(&token).await.is_err());
}

#[tokio::test]
async fn disjoint_audience_fails() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;

    let token = issuer.sign(&claims(ISSUER, json!(["https://unrelated.example.com"]), "user", 300));
    let err = verifier(url).verify(&token).await.unwrap_err();
    assert!(matches!(err, Error::InvalidJwt(_)));
}

#[tokio::test]
async fn intersecting_audience_list_passes() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;

    let token = issuer.sign(&claims(
        ISSUER,
        json!(["https://unrelated.example.com", "https://other.example.com"]),
        "user",
        300,
    ));
    assert_eq!(verifier(url).verify(&token).await.unwrap(), "user");
}

#[tokio::test]
async fn expiry_honours_sixty_second_skew() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;
    let verifier = verifier(url);

    // expired 30s ago: inside the allowance
    assert!(verifier.verify(&issuer.token("user", -30)).await.is_ok());
    // expired 61s ago: outside it
    let err = verifier.verify(&issuer.token("user", -61)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidJwt(_)));
}

#[tokio::test]
async fn not_before_in_the_future_fails() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;

    let mut claims = claims(ISSUER, json!(AUDIENCE), "user", 600);
    claims["nbf"] = json!(common::now() + 300);
    assert!(verifier(url).verify(&issuer.sign(&claims)).await.is_err());
}

#[tokio::test]
async fn missing_or_empty_subject_fails() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[issuer.jwk()]).await;
    let verifier = verifier(url);

    assert!(verifier.verify(&issuer.token("", 300)).await.is_err());

    let mut no_sub = claims(ISSUER, json!(AUDIENCE), "user", 300);
    no_sub.as_object_mut().unwrap().remove("sub");
    assert!(verifier.verify(&issuer.sign(&no_sub)).await.is_err());
}

#[tokio::test]
async fn token_signed_by_another_key_fails() {
    let server = MockServer::start().await;
    let published = TestIssuer::new("key-1");
    let impostor = TestIssuer::new("key-1");
    let url = serve_jwks(&server, &[published.jwk()]).await;

    let err = verifier(url)
        .verify(&impostor.token("user", 300))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJwt(_)));
}

#[tokio::test]
async fn unknown_key_id_fails_without_refetch_inside_cooldown() {
    let server = MockServer::start().await;
    let published = TestIssuer::new("key-1");
    let unknown = TestIssuer::new("key-2");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&[published.jwk()])))
        .expect(1)
        .mount(&server)
        .await;

    let err = verifier(jwks_url(&server))
        .verify(&unknown.token("user", 300))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(ref kid) if kid == "key-2"));
}

#[tokio::test]
async fn rotated_key_is_found_after_refetch() {
    let server = MockServer::start().await;
    let old = TestIssuer::new("key-1");
    let rotated = TestIssuer::new("key-2");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&[old.jwk()])))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&[old.jwk(), rotated.jwk()])))
        .expect(1)
        .mount(&server)
        .await;

    let config = auth_config(jwks_url(&server));
    let key_sets = Arc::new(
        KeySetProvider::new(None)
            .unwrap()
            .with_policy(Duration::from_secs(600), Duration::ZERO),
    );
    let verifier = TokenVerifier::new(&config, key_sets);

    assert!(verifier.verify(&old.token("a", 300)).await.is_ok());
    assert_eq!(verifier.verify(&rotated.token("b", 300)).await.unwrap(), "b");
}

#[tokio::test]
async fn key_set_is_fetched_once_and_cached() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&[issuer.jwk()])))
        .expect(1)
        .mount(&server)
        .await;

    let verifier = verifier(jwks_url(&server));
    for sub in ["a", "b", "c"] {
        assert_eq!(verifier.verify(&issuer.token(sub, 300)).await.unwrap(), sub);
    }
}

#[tokio::test]
async fn nothing_is_fetched_until_first_use() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let _verifier = verifier(jwks_url(&server));
}

#[tokio::test]
async fn unusable_keys_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    let url = serve_jwks(
        &server,
        &[
            json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}),
            json!({"kty": "unknown", "kid": "odd"}),
            issuer.jwk(),
        ],
    )
    .await;

    assert_eq!(verifier(url).verify(&issuer.token("user", 300)).await.unwrap(), "user");
}

#[tokio::test]
async fn unreachable_key_set_is_a_verification_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let issuer = TestIssuer::new("key-1");
    let err = verifier(jwks_url(&server))
        .verify(&issuer.token("user", 300))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeySetUnavailable(_)));
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn slow_key_set_times_out_as_verification_failure() {
    let server = MockServer::start().await;
    let issuer = TestIssuer::new("key-1");
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks(&[issuer.jwk()]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut config = auth_config(jwks_url(&server));
    config.verify_timeout = Some(Duration::from_millis(100));
    let key_sets = Arc::new(KeySetProvider::new(config.verify_timeout).unwrap());
    let verifier = TokenVerifier::new(&config, key_sets);

    let err = verifier.verify(&issuer.token("user", 300)).await.unwrap_err();
    assert!(matches!(err, Error::KeySetUnavailable(_)));
}
