//! Typed error hierarchy for the sentinel-hunt crate.
//!
//! `SentinelError` keeps the failure category of every operation visible to
//! callers:
//! - `Configuration` and `Validation` are raised locally, before any network
//!   call is attempted.
//! - `Auth` covers the Azure AD token endpoint.
//! - `Registration`, `Update` and `Persist` mean Graph or ARM rejected a
//!   write. They carry the HTTP status and the raw response body so the
//!   provider's diagnostic message reaches the caller.
//! - `QueryExecution` carries the analytics engine's error message verbatim
//!   (e.g. a KQL syntax error).
//! - `Api`, `Network` and `Parse` are the transport-level failures produced
//!   by [`AzureClient`](crate::client::AzureClient) before an operation maps
//!   them into one of the categories above.

use reqwest::StatusCode;

/// Unified error type for all sentinel-hunt operations.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    /// Required settings are missing or invalid. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Token acquisition failed: missing credentials, a non-2xx response
    /// from `/oauth2/v2.0/token` (the AADSTS body is kept in `message`), or
    /// a transport failure reaching the endpoint.
    #[error("authentication failed: {message}")]
    Auth {
        /// Human-readable description including status and Azure AD body.
        message: String,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The requested application or query does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Microsoft Graph rejected an application registration.
    #[error("application registration rejected ({status}): {body}")]
    Registration {
        /// HTTP status returned by Graph.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },

    /// Microsoft Graph rejected an application update, or the application
    /// to update could not be read.
    #[error("application update rejected ({status}): {body}")]
    Update {
        /// HTTP status returned by Graph.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },

    /// ARM rejected a hunting query upsert.
    #[error("hunting query persist rejected ({status}): {body}")]
    Persist {
        /// HTTP status returned by ARM.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },

    /// The Log Analytics engine refused to run a query.
    #[error("query execution failed ({status}): {message}")]
    QueryExecution {
        /// HTTP status returned by the query endpoint.
        status: StatusCode,
        /// Upstream error message, verbatim.
        message: String,
    },

    /// A required request field is missing or empty.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An upstream API returned a non-success status that no operation
    /// mapped to a more specific category.
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code.
        status: StatusCode,
        /// Raw response body, or an empty string if it could not be read.
        body: String,
    },

    /// JSON deserialization of a response body failed.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// DNS, TCP, TLS or timeout failure. No HTTP status is available.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Reading a KQL file from disk failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl SentinelError {
    /// Re-labels an upstream rejection as a failed application registration.
    pub(crate) fn into_registration(self) -> Self {
        match self {
            SentinelError::Api { status, body } => SentinelError::Registration { status, body },
            other => other,
        }
    }

    /// Re-labels an upstream rejection as a failed application update.
    pub(crate) fn into_update(self) -> Self {
        match self {
            SentinelError::Api { status, body } => SentinelError::Update { status, body },
            other => other,
        }
    }

    /// Re-labels an upstream rejection as a failed hunting query upsert.
    pub(crate) fn into_persist(self) -> Self {
        match self {
            SentinelError::Api { status, body } => SentinelError::Persist { status, body },
            other => other,
        }
    }

    /// Re-labels an upstream rejection as a query execution failure,
    /// extracting the analytics engine's message from the error body.
    pub(crate) fn into_query_execution(self) -> Self {
        match self {
            SentinelError::Api { status, body } => SentinelError::QueryExecution {
                status,
                message: upstream_message(&body),
            },
            other => other,
        }
    }
}

/// Pulls the human-readable message out of an Azure error envelope.
///
/// Log Analytics nests the useful part: the top-level `error.message` is
/// generic ("The request had some invalid properties") while the innermost
/// `innererror.message` names the actual syntax problem. Both are kept.
/// Bodies that are not an Azure error envelope are returned as-is.
fn upstream_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    let Some(error) = value.get("error") else {
        return body.to_string();
    };
    let Some(top) = error.get("message").and_then(|m| m.as_str()) else {
        return body.to_string();
    };

    let mut innermost = None;
    let mut cursor = error.get("innererror");
    while let Some(inner) = cursor {
        if let Some(msg) = inner.get("message").and_then(|m| m.as_str()) {
            innermost = Some(msg);
        }
        cursor = inner.get("innererror");
    }

    match innermost {
        Some(inner) if inner != top => format!("{top}: {inner}"),
        _ => top.to_string(),
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, SentinelError>;
