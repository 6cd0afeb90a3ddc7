//! Azure AD application registration and API permission grants.
//!
//! | Function | Graph call |
//! |----------|------------|
//! | [`register_application`] | POST `/applications` |
//! | [`add_api_permissions`] | GET then PATCH `/applications/{id}` |
//! | [`add_sentinel_permissions`] | as above, fixed Sentinel + ARM grants |
//! | [`register_with_sentinel_access`] | register, then grant Sentinel access |
//!
//! Permissions added here are only *requested*. Admin consent is a
//! separate, manual step in the Entra portal.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

use crate::client::AzureClient;
use crate::error::Result;
use crate::graph::{
    get_application, AccessType, Application, ImplicitGrantSettings, RequiredResourceAccess,
    ResourceAccess, WebSettings,
};

/// Microsoft Graph resource application.
pub const MICROSOFT_GRAPH_APP_ID: &str = "00000003-0000-0000-c000-000000000000";
/// Graph `User.Read` delegated permission.
pub const GRAPH_USER_READ: &str = "e1fe6dd8-ba31-4d61-89e7-88639da4683d";

/// Azure Security Insights resource application.
pub const SECURITY_INSIGHTS_APP_ID: &str = "c39ef2d1-04ce-46dc-8b5f-e9a5c60f0fc9";
/// `SecurityInsights.ReadWrite.All` application role.
pub const SECURITY_INSIGHTS_READ_WRITE_ALL: &str = "4d374829-7e5f-4c7e-b8f8-7a17e86d685f";

/// Azure Service Management resource application.
pub const AZURE_SERVICE_MANAGEMENT_APP_ID: &str = "797f4846-ba00-4fd7-ba43-dac1f8f63013";
/// ARM `user_impersonation` delegated permission.
pub const ARM_USER_IMPERSONATION: &str = "41094075-9dad-400e-a0bd-54e686782033";

const SIGN_IN_AUDIENCE: &str = "AzureADMyOrg";

/// POST body for a new application.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRegistration {
    pub display_name: String,
    pub sign_in_audience: String,
    pub web: WebSettings,
    pub required_resource_access: Vec<RequiredResourceAccess>,
}

impl ApplicationRegistration {
    /// Single-tenant web app with implicit grant enabled and Graph
    /// `User.Read` as its only permission.
    pub fn new(display_name: &str, redirect_uris: &[String]) -> Self {
        ApplicationRegistration {
            display_name: display_name.to_string(),
            sign_in_audience: SIGN_IN_AUDIENCE.to_string(),
            web: WebSettings {
                redirect_uris: redirect_uris.to_vec(),
                implicit_grant_settings: Some(ImplicitGrantSettings {
                    enable_id_token_issuance: true,
                    enable_access_token_issuance: true,
                }),
            },
            required_resource_access: vec![RequiredResourceAccess {
                resource_app_id: MICROSOFT_GRAPH_APP_ID.to_string(),
                resource_access: vec![ResourceAccess {
                    id: GRAPH_USER_READ.to_string(),
                    access_type: AccessType::Scope,
                }],
            }],
        }
    }
}

/// PATCH body replacing the full permission list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PermissionUpdate<'a> {
    required_resource_access: &'a [RequiredResourceAccess],
}

/// Summary returned by [`register_with_sentinel_access`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredApp {
    pub app_id: String,
    pub object_id: String,
    pub display_name: Option<String>,
}

/// The two grants Sentinel automation needs: the Security Insights
/// read/write role and ARM user impersonation.
pub fn sentinel_permissions() -> Vec<RequiredResourceAccess> {
    vec![
        RequiredResourceAccess {
            resource_app_id: SECURITY_INSIGHTS_APP_ID.to_string(),
            resource_access: vec![ResourceAccess {
                id: SECURITY_INSIGHTS_READ_WRITE_ALL.to_string(),
                access_type: AccessType::Role,
            }],
        },
        RequiredResourceAccess {
            resource_app_id: AZURE_SERVICE_MANAGEMENT_APP_ID.to_string(),
            resource_access: vec![ResourceAccess {
                id: ARM_USER_IMPERSONATION.to_string(),
                access_type: AccessType::Scope,
            }],
        },
    ]
}

/// Registers a new application.
///
/// # Errors
///
/// - `SentinelError::Registration`: Graph rejected the POST; the body
///   carries Graph's error (e.g. `Authorization_RequestDenied`).
/// - `SentinelError::Auth` / `Network`: token or transport failure.
#[instrument(skip(client, redirect_uris))]
pub async fn register_application(
    client: &AzureClient,
    name: &str,
    redirect_uris: &[String],
) -> Result<Application> {
    let payload = ApplicationRegistration::new(name, redirect_uris);
    let app: Application = client
        .post("applications", &payload)
        .await
        .map_err(|e| e.into_registration())
        .inspect_err(|e| error!(error = %e, "failed to register application"))?;

    info!(app_id = %app.app_id, object_id = %app.id, "application registered");
    Ok(app)
}

/// Appends `permissions` to the application's `requiredResourceAccess`
/// and writes the full list back.
///
/// Entries are concatenated as-is: calling this twice with the same block
/// leaves two copies. A repeated `resourceAppId` is logged but kept.
///
/// # Errors
///
/// - `SentinelError::Update`: the application could not be read (e.g. 404)
///   or Graph rejected the PATCH (e.g. insufficient privileges).
#[instrument(skip(client, permissions), fields(added = permissions.len()))]
pub async fn add_api_permissions(
    client: &AzureClient,
    object_id: &str,
    permissions: &[RequiredResourceAccess],
) -> Result<bool> {
    let app = get_application(client, object_id)
        .await
        .map_err(|e| e.into_update())
        .inspect_err(|e| error!(error = %e, "failed to read application"))?;

    let mut combined = app.required_resource_access;
    combined.extend_from_slice(permissions);

    let mut seen = HashSet::new();
    for entry in &combined {
        if !seen.insert(entry.resource_app_id.as_str()) {
            warn!(
                resource_app_id = %entry.resource_app_id,
                "requiredResourceAccess now lists this resource more than once"
            );
        }
    }

    client
        .patch(
            &format!("applications/{object_id}"),
            &PermissionUpdate {
                required_resource_access: &combined,
            },
        )
        .await
        .map_err(|e| e.into_update())
        .inspect_err(|e| error!(error = %e, "failed to update application permissions"))?;

    info!("API permissions added");
    Ok(true)
}

/// Grants the Security Insights and ARM permissions from
/// [`sentinel_permissions`].
pub async fn add_sentinel_permissions(client: &AzureClient, object_id: &str) -> Result<bool> {
    add_api_permissions(client, object_id, &sentinel_permissions()).await
}

/// Registers an application and immediately requests Sentinel access for it.
pub async fn register_with_sentinel_access(
    client: &AzureClient,
    name: &str,
    redirect_uris: &[String],
) -> Result<RegisteredApp> {
    let app = register_application(client, name, redirect_uris).await?;
    add_sentinel_permissions(client, &app.id).await?;
    Ok(RegisteredApp {
        app_id: app.app_id,
        object_id: app.id,
        display_name: app.display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_payload_matches_graph_contract() {
        let payload =
            ApplicationRegistration::new("Hunting App", &["https://localhost/cb".to_string()]);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "displayName": "Hunting App",
                "signInAudience": "AzureADMyOrg",
                "web": {
                    "redirectUris": ["https://localhost/cb"],
                    "implicitGrantSettings": {
                        "enableIdTokenIssuance": true,
                        "enableAccessTokenIssuance": true
                    }
                },
                "requiredResourceAccess": [{
                    "resourceAppId": "00000003-0000-0000-c000-000000000000",
                    "resourceAccess": [{"id": "e1fe6dd8-ba31-4d61-89e7-88639da4683d", "type": "Scope"}]
                }]
            })
        );
    }

    #[test]
    fn sentinel_permissions_are_role_then_scope() {
        let perms = sentinel_permissions();
        assert_eq!(perms.len(), 2);
        assert_eq!(perms[0].resource_app_id, SECURITY_INSIGHTS_APP_ID);
        assert_eq!(perms[0].resource_access[0].access_type, AccessType::Role);
        assert_eq!(perms[1].resource_app_id, AZURE_SERVICE_MANAGEMENT_APP_ID);
        assert_eq!(perms[1].resource_access[0].id, ARM_USER_IMPERSONATION);
        assert_eq!(perms[1].resource_access[0].access_type, AccessType::Scope);
    }

    #[test]
    fn registered_app_serializes_camel_case() {
        let summary = RegisteredApp {
            app_id: "a".to_string(),
            object_id: "o".to_string(),
            display_name: Some("n".to_string()),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["appId"], "a");
        assert_eq!(json["objectId"], "o");
        assert_eq!(json["displayName"], "n");
    }
}
