//! Integration tests for token acquisition using wiremock.
//!
//! The mock server plays both the Azure AD token endpoint and the API, so
//! these tests cover the full path from credential to bearer header.

use std::time::Duration;

use sentinel_hunt::auth::{Credential, TokenProvider, TokenScope};
use sentinel_hunt::client::AzureClient;
use sentinel_hunt::SentinelError;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, scope: TokenScope) -> TokenProvider {
    TokenProvider::new(Credential::new("tenant-1", "client-1", "s3cret"), scope)
        .with_authority(&server.uri())
}

#[tokio::test]
async fn token_is_requested_once_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-1"))
        .and(body_string_contains("management.azure.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "arm-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .and(header("authorization", "Bearer arm-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = AzureClient::new(
        provider(&server, TokenScope::Management),
        &format!("{}/", server.uri()),
    )
    .unwrap();

    let first: serde_json::Value = client.get("ping").await.unwrap();
    let second: serde_json::Value = client.get("ping").await.unwrap();
    assert_eq!(first["ok"], true);
    assert_eq!(second["ok"], true);
}

#[tokio::test]
async fn graph_scope_is_sent_for_graph_provider() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("graph.microsoft.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "graph-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut tp = provider(&server, TokenScope::Graph);
    let token = tp.token().await.unwrap();
    assert_eq!(token.value, "graph-token");
    assert_eq!(token.scope, TokenScope::Graph);
}

#[tokio::test]
async fn rejected_credentials_surface_aadsts_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .mount(&server)
        .await;

    // The API must never be reached without a token.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = AzureClient::new(
        provider(&server, TokenScope::Graph),
        &format!("{}/", server.uri()),
    )
    .unwrap();

    let err = client.get::<serde_json::Value>("applications").await.unwrap_err();
    match err {
        SentinelError::Auth { message, .. } => {
            assert!(message.contains("401"));
            assert!(message.contains("AADSTS7000215"));
        }
        other => panic!("expected Auth, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_token_endpoint_times_out_as_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "token_type": "Bearer",
                    "expires_in": 3599,
                    "access_token": "late-token"
                }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut tp = provider(&server, TokenScope::Management).with_timeout(Duration::from_millis(200));
    let err = tp.token().await.unwrap_err();
    match err {
        SentinelError::Auth { message, source } => {
            assert!(message.contains("failed to reach token endpoint"));
            assert!(source.is_some());
        }
        other => panic!("expected Auth, got {other:?}"),
    }
}
