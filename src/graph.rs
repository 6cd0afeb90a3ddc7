//! Microsoft Graph application resources.
//!
//! Types mirror the Graph `application` entity closely enough to register
//! and update app registrations. Unknown fields in responses are ignored.
//!
//! - [`get_application_info`]: look up an application by its client (app) ID.
//! - [`get_application`]: fetch one application by its object ID.
//!
//! Graph distinguishes the *object ID* (`id`, used in URL paths) from the
//! *application ID* (`appId`, the OAuth client ID). Write endpoints take the
//! object ID.

use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::client::AzureClient;
use crate::error::{Result, SentinelError};

/// Whether a permission is delegated (`Scope`) or an app role (`Role`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    Scope,
    Role,
}

/// One permission on a resource application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAccess {
    pub id: String,
    #[serde(rename = "type")]
    pub access_type: AccessType,
}

/// The permissions requested on one resource application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredResourceAccess {
    pub resource_app_id: String,
    pub resource_access: Vec<ResourceAccess>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitGrantSettings {
    pub enable_id_token_issuance: bool,
    pub enable_access_token_issuance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSettings {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implicit_grant_settings: Option<ImplicitGrantSettings>,
}

/// An application registration as returned by Graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Object ID. Used in `/applications/{id}` paths.
    pub id: String,
    /// Application (client) ID.
    pub app_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub sign_in_audience: Option<String>,
    #[serde(default)]
    pub web: Option<WebSettings>,
    #[serde(default)]
    pub required_resource_access: Vec<RequiredResourceAccess>,
}

/// Graph collection wrapper `{ "value": [...] }`.
#[derive(Debug, Deserialize)]
pub struct ODataList<T> {
    pub value: Vec<T>,
}

/// Finds the application whose `appId` equals `client_id`.
///
/// # Errors
///
/// - `SentinelError::NotFound`: the filter matched nothing.
/// - `SentinelError::Api`: Graph returned a non-success status.
#[instrument(skip(client))]
pub async fn get_application_info(client: &AzureClient, client_id: &str) -> Result<Application> {
    let filter = format!("appId eq '{client_id}'");
    let list: ODataList<Application> = client
        .get_with_query("applications", &[("$filter", filter.as_str())])
        .await
        .inspect_err(|e| error!(error = %e, "failed to look up application"))?;

    list.value.into_iter().next().ok_or_else(|| {
        error!("no application registered with this client id");
        SentinelError::NotFound(format!("application with appId '{client_id}'"))
    })
}

/// Fetches one application by object ID.
pub async fn get_application(client: &AzureClient, object_id: &str) -> Result<Application> {
    client.get(&format!("applications/{object_id}")).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_deserializes_graph_response() {
        let json = r#"{
            "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#applications/$entity",
            "id": "obj-123",
            "appId": "app-456",
            "displayName": "Hunting Automation",
            "signInAudience": "AzureADMyOrg",
            "web": {
                "redirectUris": ["https://localhost/callback"],
                "implicitGrantSettings": {
                    "enableIdTokenIssuance": true,
                    "enableAccessTokenIssuance": false
                }
            },
            "requiredResourceAccess": [{
                "resourceAppId": "00000003-0000-0000-c000-000000000000",
                "resourceAccess": [{"id": "e1fe6dd8-ba31-4d61-89e7-88639da4683d", "type": "Scope"}]
            }]
        }"#;
        let app: Application = serde_json::from_str(json).unwrap();
        assert_eq!(app.id, "obj-123");
        assert_eq!(app.app_id, "app-456");
        assert_eq!(app.display_name.as_deref(), Some("Hunting Automation"));
        let web = app.web.unwrap();
        assert_eq!(web.redirect_uris, vec!["https://localhost/callback"]);
        assert!(!web.implicit_grant_settings.unwrap().enable_access_token_issuance);
        assert_eq!(app.required_resource_access.len(), 1);
        assert_eq!(
            app.required_resource_access[0].resource_access[0].access_type,
            AccessType::Scope
        );
    }

    #[test]
    fn application_tolerates_missing_optional_fields() {
        let app: Application = serde_json::from_str(r#"{"id": "o", "appId": "a"}"#).unwrap();
        assert!(app.web.is_none());
        assert!(app.required_resource_access.is_empty());
    }

    #[test]
    fn resource_access_serializes_type_key() {
        let access = ResourceAccess {
            id: "perm".to_string(),
            access_type: AccessType::Role,
        };
        let json = serde_json::to_value(&access).unwrap();
        assert_eq!(json, serde_json::json!({"id": "perm", "type": "Role"}));
    }
}
