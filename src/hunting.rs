//! Sentinel hunting queries: list, upsert and run.
//!
//! Hunting queries can live in one of two ARM resource models, selected by
//! [`ResourceModel`]:
//!
//! | Model | Resource | api-version |
//! |-------|----------|-------------|
//! | `HuntingQueries` | `Microsoft.SecurityInsights/huntingQueries` | `2021-10-01-preview` |
//! | `SavedSearches` | `Microsoft.OperationalInsights/workspaces/savedSearches` | `2020-08-01` |
//!
//! Both are read into and written from the same canonical [`HuntingQuery`].
//! In the saved-search model, description, tactics and techniques travel as
//! `{name, value}` tags with comma-joined values.
//!
//! Writes are PUTs with `etag: "*"` on a path derived from the display name
//! by [`query_id`], so creating the same name twice overwrites.
//!
//! Ad-hoc KQL runs through the workspace's ARM-proxied query endpoint
//! (`.../workspaces/{name}/api/query`), which accepts the same
//! management-plane token as every other call here.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::{error, info, instrument};

use crate::client::AzureClient;
use crate::config::{ResourceModel, SentinelSettings};
use crate::error::{Result, SentinelError};
use crate::graph::ODataList;
use crate::kql::parse_kql_file;

const SECURITY_INSIGHTS_API_VERSION: &str = "2021-10-01-preview";
const LOG_ANALYTICS_API_VERSION: &str = "2020-08-01";

/// Category Sentinel uses to list saved searches as hunting queries.
pub const HUNTING_CATEGORY: &str = "Hunting Queries";

/// Default lookback for [`run_hunting_query`].
pub const DEFAULT_TIMESPAN: &str = "P1D";

const SAVED_SEARCH_VERSION: u32 = 2;

// ── Canonical types ────────────────────────────────────────────────────

/// ARM reports unset properties as `null` as often as it omits them.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A hunting query independent of how it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuntingQuery {
    #[serde(deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub query: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tactics: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub techniques: Vec<String>,
}

impl HuntingQuery {
    /// Rejects a query with no display name or no KQL text.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.display_name.trim().is_empty() {
            missing.push("displayName");
        }
        if self.query.trim().is_empty() {
            missing.push("query");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SentinelError::Validation(format!(
                "{} is required",
                missing.join(" and ")
            )))
        }
    }
}

/// A stored hunting query together with its ARM identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntingQueryRecord {
    /// Full ARM resource ID.
    pub id: Option<String>,
    /// Resource name (the path segment from [`query_id`]).
    pub name: Option<String>,
    pub etag: Option<String>,
    #[serde(flatten)]
    pub query: HuntingQuery,
}

/// Saved-search tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

// ── Workspace addressing ───────────────────────────────────────────────

/// The Sentinel workspace all calls in this module target.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
    pub model: ResourceModel,
}

impl Workspace {
    pub fn from_settings(settings: &SentinelSettings) -> Self {
        Workspace {
            subscription_id: settings.subscription_id.clone(),
            resource_group: settings.resource_group.clone(),
            workspace_name: settings.workspace_name.clone(),
            model: settings.resource_model,
        }
    }

    fn workspace_path(&self) -> String {
        format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.OperationalInsights/workspaces/{}",
            self.subscription_id, self.resource_group, self.workspace_name
        )
    }

    fn collection_path(&self) -> String {
        match self.model {
            ResourceModel::HuntingQueries => format!(
                "{}/providers/Microsoft.SecurityInsights/huntingQueries",
                self.workspace_path()
            ),
            ResourceModel::SavedSearches => format!("{}/savedSearches", self.workspace_path()),
        }
    }

    fn api_version(&self) -> &'static str {
        match self.model {
            ResourceModel::HuntingQueries => SECURITY_INSIGHTS_API_VERSION,
            ResourceModel::SavedSearches => LOG_ANALYTICS_API_VERSION,
        }
    }

    /// Relative URL of the hunting query collection.
    pub fn list_url(&self) -> String {
        format!("{}?api-version={}", self.collection_path(), self.api_version())
    }

    /// Relative URL of one hunting query.
    pub fn item_url(&self, id: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.collection_path(),
            id,
            self.api_version()
        )
    }

    /// Relative URL of the workspace query endpoint.
    pub fn query_url(&self) -> String {
        format!(
            "{}/api/query?api-version={}",
            self.workspace_path(),
            LOG_ANALYTICS_API_VERSION
        )
    }
}

/// Derives the resource name for a hunting query from its display name.
///
/// The result is lower-case and contains only ASCII letters, digits, `-`
/// and `_`. Whitespace is removed for `HuntingQueries` and collapsed into a
/// single `-` for `SavedSearches`. The same display name always yields the
/// same identifier, which is what makes re-creation an overwrite.
///
/// Punctuation is dropped, so names differing only in punctuation share an
/// identifier ("a/b" and "ab"). Non-ASCII letters would be dropped the same
/// way; [`create_hunting_query`] rejects such names instead.
pub fn query_id(display_name: &str, model: ResourceModel) -> String {
    let separator = match model {
        ResourceModel::HuntingQueries => "",
        ResourceModel::SavedSearches => "-",
    };
    display_name
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
        .to_ascii_lowercase()
}

// ── Wire shapes ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ResourceBody<P> {
    etag: &'static str,
    properties: P,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedSearchProperties<'a> {
    category: &'static str,
    display_name: &'a str,
    query: &'a str,
    version: u32,
    tags: Vec<Tag>,
}

/// Generic ARM resource envelope; `properties` is decoded per model.
#[derive(Debug, Deserialize)]
struct ArmResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SavedSearchRead {
    #[serde(deserialize_with = "null_as_default")]
    display_name: String,
    #[serde(deserialize_with = "null_as_default")]
    query: String,
    #[serde(deserialize_with = "null_as_default")]
    tags: Vec<Tag>,
}

fn split_tag_value(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Encodes description, tactics and techniques as saved-search tags.
/// Empty fields produce no tag.
pub fn to_tags(query: &HuntingQuery) -> Vec<Tag> {
    let mut tags = Vec::new();
    if !query.description.is_empty() {
        tags.push(Tag {
            name: "description".to_string(),
            value: query.description.clone(),
        });
    }
    if !query.tactics.is_empty() {
        tags.push(Tag {
            name: "tactics".to_string(),
            value: query.tactics.join(","),
        });
    }
    if !query.techniques.is_empty() {
        tags.push(Tag {
            name: "techniques".to_string(),
            value: query.techniques.join(","),
        });
    }
    tags
}

fn from_saved_search(props: SavedSearchRead) -> HuntingQuery {
    let mut query = HuntingQuery {
        display_name: props.display_name,
        query: props.query,
        ..HuntingQuery::default()
    };
    for tag in props.tags {
        match tag.name.to_ascii_lowercase().as_str() {
            "description" => query.description = tag.value,
            "tactics" => query.tactics.extend(split_tag_value(&tag.value)),
            "techniques" => query.techniques.extend(split_tag_value(&tag.value)),
            _ => {}
        }
    }
    query
}

fn decode(resource: ArmResource, model: ResourceModel) -> Result<HuntingQueryRecord> {
    let properties = match resource.properties {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        other => other,
    };
    let query = match model {
        ResourceModel::HuntingQueries => serde_json::from_value(properties)?,
        ResourceModel::SavedSearches => from_saved_search(serde_json::from_value(properties)?),
    };
    Ok(HuntingQueryRecord {
        id: resource.id,
        name: resource.name,
        etag: resource.etag,
        query,
    })
}

fn encode(query: &HuntingQuery, model: ResourceModel) -> Result<serde_json::Value> {
    let value = match model {
        ResourceModel::HuntingQueries => serde_json::to_value(ResourceBody {
            etag: "*",
            properties: query,
        })?,
        ResourceModel::SavedSearches => serde_json::to_value(ResourceBody {
            etag: "*",
            properties: SavedSearchProperties {
                category: HUNTING_CATEGORY,
                display_name: &query.display_name,
                query: &query.query,
                version: SAVED_SEARCH_VERSION,
                tags: to_tags(query),
            },
        })?,
    };
    Ok(value)
}

// ── Query execution types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    timespan: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Tabular result of a KQL query, as returned by the engine.
///
/// Top-level fields besides `tables` are kept in `extra`. A partial failure
/// arrives as HTTP 200 with an `error` object there, next to whatever rows
/// the engine did return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QueryResult {
    /// The `error` object of a partially failed query, if any.
    pub fn partial_error(&self) -> Option<&serde_json::Value> {
        self.extra.get("error")
    }
}

// ── Endpoint functions ─────────────────────────────────────────────────

/// Lists every hunting query stored in the workspace.
#[instrument(skip(client, workspace), fields(model = ?workspace.model))]
pub async fn list_hunting_queries(
    client: &AzureClient,
    workspace: &Workspace,
) -> Result<Vec<HuntingQueryRecord>> {
    let list: ODataList<ArmResource> = client
        .get(&workspace.list_url())
        .await
        .inspect_err(|e| error!(error = %e, "failed to list hunting queries"))?;

    list.value
        .into_iter()
        .map(|resource| decode(resource, workspace.model))
        .collect()
}

/// Creates or overwrites a hunting query.
///
/// # Errors
///
/// - `SentinelError::Validation`: display name or query missing, the display
///   name contains non-ASCII letters or digits, or it has no characters
///   usable in an identifier. Raised before any request is sent.
/// - `SentinelError::Persist`: ARM rejected the PUT. KQL syntax is not
///   checked at this point; a broken query only fails when run.
#[instrument(skip(client, workspace, data), fields(display_name = %data.display_name))]
pub async fn create_hunting_query(
    client: &AzureClient,
    workspace: &Workspace,
    data: &HuntingQuery,
) -> Result<HuntingQueryRecord> {
    data.validate()?;
    if let Some(c) = data
        .display_name
        .chars()
        .find(|c| c.is_alphanumeric() && !c.is_ascii())
    {
        return Err(SentinelError::Validation(format!(
            "displayName '{}' contains non-ASCII character '{c}'",
            data.display_name
        )));
    }
    let id = query_id(&data.display_name, workspace.model);
    if id.is_empty() {
        return Err(SentinelError::Validation(format!(
            "displayName '{}' yields an empty identifier",
            data.display_name
        )));
    }

    let body = encode(data, workspace.model)?;
    let resource: ArmResource = client
        .put(&workspace.item_url(&id), &body)
        .await
        .map_err(|e| e.into_persist())
        .inspect_err(|e| error!(error = %e, query_id = %id, "failed to persist hunting query"))?;

    info!(query_id = %id, "hunting query saved");
    decode(resource, workspace.model)
}

/// Runs KQL against the workspace over `timespan` (an ISO-8601 duration or
/// interval, [`DEFAULT_TIMESPAN`] when `None`).
///
/// # Errors
///
/// - `SentinelError::Validation`: empty query.
/// - `SentinelError::QueryExecution`: the engine rejected the query; the
///   message is the upstream one (syntax errors included).
#[instrument(skip(client, workspace, query))]
pub async fn run_hunting_query(
    client: &AzureClient,
    workspace: &Workspace,
    query: &str,
    timespan: Option<&str>,
) -> Result<QueryResult> {
    if query.trim().is_empty() {
        return Err(SentinelError::Validation("query is required".to_string()));
    }
    let request = QueryRequest {
        query,
        timespan: timespan.unwrap_or(DEFAULT_TIMESPAN),
    };

    client
        .post(&workspace.query_url(), &request)
        .await
        .map_err(|e| e.into_query_execution())
        .inspect_err(|e| error!(error = %e, "hunting query execution failed"))
}

/// Creates a hunting query from caller-supplied fields.
pub async fn create_query_from_input(
    client: &AzureClient,
    workspace: &Workspace,
    data: &HuntingQuery,
) -> Result<HuntingQueryRecord> {
    create_hunting_query(client, workspace, data)
        .await
        .inspect_err(|e| error!(error = %e, "failed to create query from input"))
}

/// Parses a `.kql` file and creates the hunting query it describes.
pub async fn create_query_from_file(
    client: &AzureClient,
    workspace: &Workspace,
    path: &Path,
) -> Result<HuntingQueryRecord> {
    let result = match parse_kql_file(path) {
        Ok(parsed) => create_hunting_query(client, workspace, &parsed.into()).await,
        Err(e) => Err(e),
    };
    result.inspect_err(|e| {
        error!(error = %e, path = %path.display(), "failed to create query from file")
    })
}
