//! Authenticated HTTP client for Microsoft Graph and Azure Resource Manager.
//!
//! `AzureClient` wraps a `reqwest::Client` and a [`TokenProvider`] behind a
//! `Mutex`, providing JSON request helpers (`get`, `post`, `put`, `patch`).
//! One client is bound to one audience: [`AzureClient::graph`] talks to
//! `graph.microsoft.com`, [`AzureClient::management`] to
//! `management.azure.com`.
//!
//! Non-success responses are returned as [`SentinelError::Api`] with the
//! response body preserved. Nothing is retried: a 401 or any other failure
//! propagates to the caller as-is.

use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::{Credential, TokenProvider, TokenScope};
use crate::error::{Result, SentinelError};

/// Microsoft Graph v1.0 root.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0/";

/// Azure Resource Manager root.
pub const MANAGEMENT_BASE_URL: &str = "https://management.azure.com/";

/// Covers TCP + TLS handshake only.
const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Full round-trip including the response body. Log Analytics queries are
/// the slowest calls this crate makes.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn build_api_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .timeout(API_REQUEST_TIMEOUT)
        .build()?)
}

/// Authenticated HTTP client for one Azure audience.
///
/// `auth` is behind a `Mutex` because refreshing needs `&mut TokenProvider`
/// while API methods take `&self`. The lock is held only for the token
/// check/refresh, never across an API round-trip.
pub struct AzureClient {
    client: Client,
    base_url: String,
    auth: Mutex<TokenProvider>,
}

impl AzureClient {
    /// Creates a client for an arbitrary base URL. `base_url` must end in `/`;
    /// request paths are appended to it verbatim.
    pub fn new(auth: TokenProvider, base_url: &str) -> Result<Self> {
        Ok(AzureClient {
            client: build_api_client()?,
            base_url: base_url.to_string(),
            auth: Mutex::new(auth),
        })
    }

    /// Microsoft Graph client authenticated with `credential`.
    pub fn graph(credential: Credential) -> Result<Self> {
        Self::new(
            TokenProvider::new(credential, TokenScope::Graph),
            GRAPH_BASE_URL,
        )
    }

    /// Azure Resource Manager client authenticated with `credential`.
    pub fn management(credential: Credential) -> Result<Self> {
        Self::new(
            TokenProvider::new(credential, TokenScope::Management),
            MANAGEMENT_BASE_URL,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut auth = self.auth.lock().await;
        Ok(auth.token().await?.value)
    }

    /// Sends an authenticated request and returns the body text of a
    /// successful response.
    ///
    /// `path` is relative to `base_url` and may carry its own query string
    /// (e.g. `?api-version=...`); `query` pairs are appended URL-encoded.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.bearer_token().await?;

        debug!(%method, %url, "sending request");
        let mut req = self.client.request(method, &url).bearer_auth(token);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(payload) = body {
            req = req.json(payload);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            // The status already carries the failure; an unreadable body is
            // reported as empty.
            let body = resp.text().await.unwrap_or_default();
            return Err(SentinelError::Api { status, body });
        }
        Ok(resp.text().await?)
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T> {
        let text = self.send(method, path, query, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sends an authenticated GET request and deserializes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<T, ()>(Method::GET, path, &[], None).await
    }

    /// GET with additional URL-encoded query parameters (e.g. OData `$filter`).
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.send_json::<T, ()>(Method::GET, path, query, None).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PUT, path, &[], Some(body)).await
    }

    /// Sends an authenticated PATCH. Graph answers PATCH with
    /// `204 No Content`, so the body is discarded.
    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(Method::PATCH, path, &[], Some(body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn truncated_success_body_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            // Promises 100 bytes, sends 6, then hangs up.
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"ok\":",
                )
                .await;
        });

        let client = AzureClient::new(
            TokenProvider::with_token("tok", TokenScope::Management),
            &format!("http://{addr}/"),
        )
        .unwrap();
        let err = client.get::<serde_json::Value>("ping").await.unwrap_err();
        assert!(
            matches!(err, SentinelError::Network(_)),
            "expected Network, got {err:?}"
        );
    }
}
