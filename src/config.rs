//! Runtime configuration.
//!
//! [`Config`] is an explicit struct handed to constructors rather than
//! ambient global state. It is assembled from an optional TOML file and then
//! overlaid with environment variables (a `.env` file is honoured by the CLI
//! via `dotenvy`). [`Config::validate`] fails fast with
//! [`SentinelError::Configuration`] naming every missing setting, so a bad
//! setup never surfaces later as a cryptic 401 or 404.
//!
//! ```toml
//! [azure]
//! tenant_id = "..."
//! client_id = "..."
//! client_secret = "..."
//!
//! [sentinel]
//! workspace_name = "soc-workspace"
//! workspace_id = "..."
//! resource_group = "soc-rg"
//! subscription_id = "..."
//! resource_model = "saved-searches"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::auth::Credential;
use crate::error::{Result, SentinelError};

/// Which ARM resource type hunting queries are persisted as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceModel {
    /// `Microsoft.SecurityInsights/huntingQueries`: tactics and techniques
    /// are native properties.
    #[default]
    HuntingQueries,
    /// `Microsoft.OperationalInsights/workspaces/savedSearches`: tactics,
    /// techniques and description are encoded as tags.
    SavedSearches,
}

impl FromStr for ResourceModel {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hunting-queries" | "huntingqueries" => Ok(ResourceModel::HuntingQueries),
            "saved-searches" | "savedsearches" => Ok(ResourceModel::SavedSearches),
            other => Err(SentinelError::Configuration(format!(
                "unknown resource model '{other}', expected 'hunting-queries' or 'saved-searches'"
            ))),
        }
    }
}

/// Service principal settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Target Sentinel workspace.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentinelSettings {
    /// Workspace name, used in ARM resource paths.
    pub workspace_name: String,
    /// Workspace GUID (customer id).
    pub workspace_id: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub resource_model: ResourceModel,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub azure: AzureSettings,
    pub sentinel: SentinelSettings,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("azure", &self.credential())
            .field("sentinel", &self.sentinel)
            .finish()
    }
}

impl Config {
    /// Parses a TOML document. Missing keys are left empty for
    /// [`validate`](Self::validate) to report.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SentinelError::Configuration(format!("invalid config file: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Overlays values found through `lookup` on top of the current ones.
    /// Unset or empty variables leave the existing value alone.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let targets: [(&str, &mut String); 7] = [
            ("AZURE_TENANT_ID", &mut self.azure.tenant_id),
            ("AZURE_CLIENT_ID", &mut self.azure.client_id),
            ("AZURE_CLIENT_SECRET", &mut self.azure.client_secret),
            ("WORKSPACE_NAME", &mut self.sentinel.workspace_name),
            ("WORKSPACE_ID", &mut self.sentinel.workspace_id),
            ("WORKSPACE_RESOURCE_GROUP", &mut self.sentinel.resource_group),
            ("SUBSCRIPTION_ID", &mut self.sentinel.subscription_id),
        ];
        for (key, slot) in targets {
            if let Some(value) = get(key) {
                *slot = value;
            }
        }

        if let Some(model) = get("SENTINEL_RESOURCE_MODEL") {
            self.sentinel.resource_model = model.parse()?;
        }
        Ok(())
    }

    /// Loads the optional file, overlays the process environment and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required setting is present.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("azure.tenant_id", &self.azure.tenant_id),
            ("azure.client_id", &self.azure.client_id),
            ("azure.client_secret", &self.azure.client_secret),
            ("sentinel.workspace_name", &self.sentinel.workspace_name),
            ("sentinel.workspace_id", &self.sentinel.workspace_id),
            ("sentinel.resource_group", &self.sentinel.resource_group),
            ("sentinel.subscription_id", &self.sentinel.subscription_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SentinelError::Configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn credential(&self) -> Credential {
        Credential::new(
            &self.azure.tenant_id,
            &self.azure.client_id,
            &self.azure.client_secret,
        )
    }
}
