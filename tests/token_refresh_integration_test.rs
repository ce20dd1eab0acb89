//! Integration tests for the transparent token refresh flow.
//!
//! These tests verify the one-shot refresh contract end to end through
//! the service layer:
//! 1. A validate call failing with an auth-class error triggers exactly
//!    one register call and then succeeds
//! 2. A second rejection after the refresh is surfaced, never retried
//! 3. Terms-not-signed refusals are terminal and skip the refresh path
//! 4. A cleared token behaves exactly like one that was never fetched

use std::sync::Arc;

mod common;

use bytes::Bytes;
use trustline::adapters::memory_storage::MemoryCredentialStorage;
use trustline::adapters::mock::account_data::MockAccountDataSource;
use trustline::adapters::mock::http::{MockHttpClient, MockResponse};
use trustline::adapters::mock::openid::MockOpenIdIssuer;
use trustline::error::TrustError;
use trustline::identity::IdentityService;
use trustline::integrations::IntegrationsService;
use trustline::models::{AccountDataEvent, ThreePid, ACCOUNT_DATA_WIDGETS};
use trustline::store::TokenStore;
use trustline::traits::http::Response;

const IDENTITY_BASE: &str = "https://id.example.com";
const REGISTER_URL: &str = "https://id.example.com/_matrix/identity/v2/account/register";
const ACCOUNT_URL: &str = "https://id.example.com/_matrix/identity/v2/account";
const SCALAR_REGISTER_URL: &str = "https://api.example.com/register?v=1.1";

fn store() -> Arc<TokenStore> {
    Arc::new(TokenStore::new(Arc::new(MemoryCredentialStorage::new())))
}

fn identity_fixture() -> (
    Arc<MockHttpClient>,
    Arc<MockOpenIdIssuer>,
    Arc<TokenStore>,
    IdentityService,
) {
    let source = Arc::new(MockAccountDataSource::new());
    let http = Arc::new(MockHttpClient::new());
    let issuer = Arc::new(MockOpenIdIssuer::new());
    let store = store();
    let service = IdentityService::new(source, issuer.clone(), http.clone(), store.clone());
    (http, issuer, store, service)
}

fn ok_json(body: &str) -> MockResponse {
    MockResponse::Success(Response::new(200, Bytes::from(body.to_string())))
}

fn status_json(status: u16, body: &str) -> MockResponse {
    MockResponse::Success(Response::new(status, Bytes::from(body.to_string())))
}

#[tokio::test]
async fn test_validate_refreshes_once_after_401() {
    common::init_tracing();
    let (http, issuer, store, service) = identity_fixture();
    service
        .set_identity_server(Some(IDENTITY_BASE))
        .await
        .unwrap();
    store.set_identity_token(Some("stale")).unwrap();

    // First validate rejects the stale token, the refreshed one passes.
    http.push_response(ACCOUNT_URL, status_json(401, r#"{"error":"expired"}"#));
    http.set_response(ACCOUNT_URL, ok_json(r#"{"user_id":"@a:b.c"}"#));
    http.set_response(REGISTER_URL, ok_json(r#"{"token":"fresh"}"#));

    let token = service.validate_token().await.unwrap();
    assert_eq!(token, "fresh");
    assert_eq!(http.requests_to(REGISTER_URL).len(), 1);
    assert_eq!(http.requests_to(ACCOUNT_URL).len(), 2);
    assert_eq!(issuer.calls(), 1);
    assert_eq!(store.identity_token().unwrap().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_validate_surfaces_second_rejection_without_looping() {
    let (http, _issuer, store, service) = identity_fixture();
    service
        .set_identity_server(Some(IDENTITY_BASE))
        .await
        .unwrap();
    store.set_identity_token(Some("stale")).unwrap();

    // Every validate rejects, including the one after the refresh.
    http.set_response(ACCOUNT_URL, status_json(401, r#"{"error":"expired"}"#));
    http.set_response(REGISTER_URL, ok_json(r#"{"token":"fresh"}"#));

    let err = service.validate_token().await.unwrap_err();
    assert!(err.is_auth_failure());
    // One refresh, two validations, no further retry.
    assert_eq!(http.requests_to(REGISTER_URL).len(), 1);
    assert_eq!(http.requests_to(ACCOUNT_URL).len(), 2);
    // The rejected refreshed token was cleared again.
    assert_eq!(store.identity_token().unwrap(), None);
}

#[tokio::test]
async fn test_cleared_token_is_reacquired_like_never_fetched() {
    let (http, issuer, store, service) = identity_fixture();
    service
        .set_identity_server(Some(IDENTITY_BASE))
        .await
        .unwrap();
    http.set_response(REGISTER_URL, ok_json(r#"{"token":"first"}"#));

    assert_eq!(service.ensure_token().await.unwrap(), "first");
    assert_eq!(issuer.calls(), 1);

    // Clearing and ensuring again goes through the full acquisition.
    store.set_identity_token(None).unwrap();
    http.set_response(REGISTER_URL, ok_json(r#"{"token":"second"}"#));
    assert_eq!(service.ensure_token().await.unwrap(), "second");
    assert_eq!(issuer.calls(), 2);
}

#[tokio::test]
async fn test_lookup_terms_not_signed_skips_refresh() {
    let (http, issuer, store, service) = identity_fixture();
    service
        .set_identity_server(Some(IDENTITY_BASE))
        .await
        .unwrap();
    store.set_identity_token(Some("tok")).unwrap();

    let lookup_url = "https://id.example.com/_matrix/identity/v2/lookup";
    http.set_response(
        lookup_url,
        status_json(403, r#"{"errcode":"M_TERMS_NOT_SIGNED","error":"sign first"}"#),
    );

    let err = service
        .lookup(&[ThreePid::email("alice@example.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, TrustError::TermsNotSigned));
    assert_eq!(http.requests_to(lookup_url).len(), 1);
    assert_eq!(issuer.calls(), 0);
    // The token survives: terms are orthogonal to token validity.
    assert_eq!(store.identity_token().unwrap().as_deref(), Some("tok"));
}

#[tokio::test]
async fn test_no_identity_server_is_terminal_without_io() {
    let (http, issuer, _store, service) = identity_fixture();

    let err = service.ensure_token().await.unwrap_err();
    assert!(matches!(err, TrustError::NoIdentityServerConfigured));
    assert!(http.requests().is_empty());
    assert_eq!(issuer.calls(), 0);
}

#[tokio::test]
async fn test_scalar_and_identity_tokens_are_independent() {
    // The two purposes are separate instances of the same pattern: a
    // rejection on one must not disturb the other's cached token.
    let source = Arc::new(MockAccountDataSource::new());
    let http = Arc::new(MockHttpClient::new());
    let issuer = Arc::new(MockOpenIdIssuer::new());
    let store = store();

    let identity = IdentityService::new(
        source.clone(),
        issuer.clone(),
        http.clone(),
        store.clone(),
    );
    let integrations = IntegrationsService::new(
        source.clone(),
        issuer.clone(),
        http.clone(),
        store.clone(),
    );

    identity
        .set_identity_server(Some(IDENTITY_BASE))
        .await
        .unwrap();
    store.set_identity_token(Some("identity-tok")).unwrap();
    source.seed(AccountDataEvent::new(
        ACCOUNT_DATA_WIDGETS,
        serde_json::json!({
            "manager": {
                "content": {
                    "type": "m.integration_manager",
                    "url": "https://im.example.com",
                    "data": { "api_url": "https://api.example.com" }
                }
            }
        }),
    ));
    http.set_response(SCALAR_REGISTER_URL, ok_json(r#"{"scalar_token":"sc-1"}"#));

    let scalar = integrations.ensure_scalar_token().await.unwrap();
    assert_eq!(scalar, "sc-1");

    // Invalidate the scalar token; the identity token stays cached.
    store
        .set_scalar_token("https://api.example.com", None)
        .unwrap();
    assert_eq!(
        store.identity_token().unwrap().as_deref(),
        Some("identity-tok")
    );
    assert_eq!(service_token(&identity).await, "identity-tok");
}

async fn service_token(identity: &IdentityService) -> String {
    identity.ensure_token().await.unwrap()
}
