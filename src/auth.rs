//! OAuth2 client-credentials authentication for the Microsoft identity platform.
//!
//! A [`Credential`] holds the tenant/client/secret triple read from
//! configuration. A [`TokenProvider`] binds that credential to one
//! [`TokenScope`] and acquires bearer tokens from Azure AD's
//! `/oauth2/v2.0/token` endpoint. The token is cached until it comes within
//! [`EXPIRY_BUFFER_SECS`] of expiry, then re-requested on the next call.
//! Failures are never retried here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Result, SentinelError};

/// Public Azure AD authority. Overridable via [`TokenProvider::with_authority`].
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Safety buffer subtracted from `expires_in` so a token is refreshed before
/// it actually expires.
const EXPIRY_BUFFER_SECS: u64 = 60;

/// Whole token round-trip, connect included. A stalled authority fails
/// with `Auth` instead of hanging the first API call.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The two audiences this crate requests tokens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    /// Microsoft Graph (application registrations).
    Graph,
    /// Azure Resource Manager (Sentinel, Log Analytics).
    Management,
}

impl TokenScope {
    /// The `.default` scope string sent to the token endpoint.
    pub fn as_scope(&self) -> &'static str {
        match self {
            TokenScope::Graph => "https://graph.microsoft.com/.default",
            TokenScope::Management => "https://management.azure.com/.default",
        }
    }
}

/// Service principal credentials.
#[derive(Clone)]
pub struct Credential {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Credential {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Credential {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// Names of the fields that are empty, in declaration order.
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.tenant_id.trim().is_empty() {
            missing.push("tenant_id");
        }
        if self.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if self.client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        missing
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Form body sent to the token endpoint.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// Subset of the Azure AD token response that we need.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// A bearer token for one audience.
#[derive(Clone)]
pub struct Token {
    pub value: String,
    pub scope: TokenScope,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Acquires and caches tokens for a single scope.
///
/// Invariants:
/// - `response` is `None` until the first successful `refresh_token()`.
/// - `acquired_at` is `Some` whenever `response` is `Some`.
pub struct TokenProvider {
    client: reqwest::Client,
    credential: Credential,
    scope: TokenScope,
    authority: String,
    timeout: Duration,
    response: Option<TokenResponse>,
    acquired_at: Option<Instant>,
}

impl TokenProvider {
    pub fn new(credential: Credential, scope: TokenScope) -> Self {
        TokenProvider {
            client: reqwest::Client::new(),
            credential,
            scope,
            authority: DEFAULT_AUTHORITY.to_string(),
            timeout: TOKEN_REQUEST_TIMEOUT,
            response: None,
            acquired_at: None,
        }
    }

    /// Points the provider at a different authority host (no trailing slash).
    /// Used by tests to target a mock token endpoint.
    pub fn with_authority(mut self, authority: &str) -> Self {
        self.authority = authority.trim_end_matches('/').to_string();
        self
    }

    /// Overrides the token request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates a provider with a pre-set token, bypassing Azure AD.
    /// The token is treated as freshly acquired (expires_in = 3600s).
    pub fn with_token(token: &str, scope: TokenScope) -> Self {
        TokenProvider {
            client: reqwest::Client::new(),
            credential: Credential::new("", "", ""),
            scope,
            authority: DEFAULT_AUTHORITY.to_string(),
            timeout: TOKEN_REQUEST_TIMEOUT,
            response: Some(TokenResponse {
                access_token: token.to_string(),
                token_type: "Bearer".to_string(),
                expires_in: 3600,
            }),
            acquired_at: Some(Instant::now()),
        }
    }

    pub fn scope(&self) -> TokenScope {
        self.scope
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority, self.credential.tenant_id
        )
    }

    /// Fetches a new token from Azure AD and caches it.
    ///
    /// Missing credential fields fail before any request is sent. The
    /// response body is read as text first so the AADSTS message survives
    /// into the error on failure.
    pub async fn refresh_token(&mut self) -> Result<()> {
        let missing = self.credential.missing_fields();
        if !missing.is_empty() {
            return Err(SentinelError::Auth {
                message: format!("missing credential fields: {}", missing.join(", ")),
                source: None,
            });
        }

        let body = TokenRequest {
            client_id: &self.credential.client_id,
            scope: self.scope.as_scope(),
            client_secret: &self.credential.client_secret,
            grant_type: "client_credentials",
        };

        debug!(scope = self.scope.as_scope(), "requesting access token");
        let response = self
            .client
            .post(self.token_url())
            .timeout(self.timeout)
            .form(&body)
            .send()
            .await
            .map_err(|e| SentinelError::Auth {
                message: "failed to reach token endpoint".to_string(),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SentinelError::Auth {
            message: "failed to read token response".to_string(),
            source: Some(Box::new(e)),
        })?;

        if !status.is_success() {
            return Err(SentinelError::Auth {
                message: format!("token request failed ({status}): {body}"),
                source: None,
            });
        }

        let resp: TokenResponse =
            serde_json::from_str(&body).map_err(|e| SentinelError::Auth {
                message: "failed to parse token response".to_string(),
                source: Some(Box::new(e)),
            })?;
        self.acquired_at = Some(Instant::now());
        self.response = Some(resp);

        Ok(())
    }

    /// Returns `true` if a token exists but has exceeded its lifetime
    /// minus the safety buffer.
    fn is_expired(&self) -> bool {
        match (&self.response, self.acquired_at) {
            (Some(resp), Some(acquired)) => {
                let lifetime = resp.expires_in.saturating_sub(EXPIRY_BUFFER_SECS);
                acquired.elapsed().as_secs() >= lifetime
            }
            _ => false,
        }
    }

    /// Returns the cached access token, or `None` if absent or expired.
    pub fn cached(&self) -> Option<&str> {
        if self.is_expired() {
            return None;
        }
        self.response.as_ref().map(|r| r.access_token.as_str())
    }

    /// Returns a valid token, refreshing first if none is cached.
    pub async fn token(&mut self) -> Result<Token> {
        if self.cached().is_none() {
            self.refresh_token().await?;
        }

        self.cached()
            .map(|value| Token {
                value: value.to_owned(),
                scope: self.scope,
            })
            .ok_or_else(|| SentinelError::Auth {
                message: "token missing after refresh".to_string(),
                source: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_map_to_default_audiences() {
        assert_eq!(
            TokenScope::Graph.as_scope(),
            "https://graph.microsoft.com/.default"
        );
        assert_eq!(
            TokenScope::Management.as_scope(),
            "https://management.azure.com/.default"
        );
    }

    #[test]
    fn token_is_none_before_refresh() {
        let tp = TokenProvider::new(
            Credential::new("tenant", "client", "secret"),
            TokenScope::Graph,
        );
        assert!(tp.cached().is_none());
    }

    #[test]
    fn token_url_interpolation() {
        let tp = TokenProvider::new(
            Credential::new("abc-123", "client", "secret"),
            TokenScope::Management,
        );
        assert_eq!(
            tp.token_url(),
            "https://login.microsoftonline.com/abc-123/oauth2/v2.0/token"
        );
    }

    #[test]
    fn authority_override_strips_trailing_slash() {
        let tp = TokenProvider::new(Credential::new("t", "c", "s"), TokenScope::Graph)
            .with_authority("http://127.0.0.1:9999/");
        assert_eq!(tp.token_url(), "http://127.0.0.1:9999/t/oauth2/v2.0/token");
    }

    #[test]
    fn credential_debug_redacts_secret() {
        let cred = Credential::new("tenant", "client", "super-secret");
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_network() {
        // The authority is unroutable; reaching it would produce a network
        // error message instead of the missing-field message.
        let mut tp = TokenProvider::new(Credential::new("tenant", "", " "), TokenScope::Graph)
            .with_authority("http://192.0.2.1");
        let err = tp.refresh_token().await.unwrap_err();
        match err {
            SentinelError::Auth { message, .. } => {
                assert!(message.contains("client_id"));
                assert!(message.contains("client_secret"));
                assert!(!message.contains("tenant_id"));
            }
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[test]
    fn token_request_serializes_as_form() {
        let req = TokenRequest {
            client_id: "cid",
            scope: TokenScope::Management.as_scope(),
            client_secret: "s&cret",
            grant_type: "client_credentials",
        };
        let encoded = serde_urlencoded::to_string(&req).unwrap();
        assert!(encoded.contains("client_id=cid"));
        assert!(encoded.contains("grant_type=client_credentials"));
        assert!(encoded.contains("client_secret=s%26cret"));
        assert!(encoded.contains("scope=https%3A%2F%2Fmanagement.azure.com%2F.default"));
    }

    #[test]
    fn token_response_ignores_unknown_fields() {
        let json = r#"{
            "token_type": "Bearer",
            "expires_in": 3599,
            "ext_expires_in": 3599,
            "access_token": "tok"
        }"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token, "tok");
        assert_eq!(resp.expires_in, 3599);
    }

    #[test]
    fn expired_token_returns_none() {
        let mut tp = TokenProvider::with_token("test-token", TokenScope::Graph);
        tp.acquired_at = Some(Instant::now() - Duration::from_secs(7200));
        assert!(tp.cached().is_none());
    }

    #[test]
    fn token_within_buffer_returns_none() {
        // expires_in=90 with a 60s buffer leaves an effective 30s lifetime.
        let mut tp = TokenProvider::with_token("test-token", TokenScope::Management);
        tp.response.as_mut().unwrap().expires_in = 90;
        tp.acquired_at = Some(Instant::now() - Duration::from_secs(31));
        assert!(tp.cached().is_none());
    }

    #[tokio::test]
    async fn fresh_token_is_served_from_cache() {
        let mut tp = TokenProvider::with_token("cached-token", TokenScope::Management);
        let token = tp.token().await.unwrap();
        assert_eq!(token.value, "cached-token");
        assert_eq!(token.scope, TokenScope::Management);
    }
}
