//! Async Rust client for Azure AD app registration and Microsoft Sentinel
//! hunting queries.
//!
//! Registers applications and requests Sentinel API permissions through
//! Microsoft Graph, then creates, lists and runs hunting queries (saved KQL
//! searches) in a Log Analytics workspace through Azure Resource Manager.
//!
//! # Modules
//!
//! - [`auth`]: client-credentials token provider with expiry tracking.
//! - [`client`]: authenticated JSON HTTP client bound to one audience.
//! - [`config`]: explicit configuration struct, TOML + environment.
//! - [`error`]: typed error hierarchy (`SentinelError`).
//! - [`graph`]: Graph application types and lookups.
//! - [`app_registration`]: application registration and permission grants.
//! - [`hunting`]: hunting query list/upsert/run in either resource model.
//! - [`kql`]: parser for annotated `.kql` files.
//!
//! # Quick Start
//!
//! ```ignore
//! use sentinel_hunt::client::AzureClient;
//! use sentinel_hunt::config::Config;
//! use sentinel_hunt::hunting::{Workspace, run_hunting_query};
//!
//! let config = Config::load(None)?;
//! let arm = AzureClient::management(config.credential())?;
//! let workspace = Workspace::from_settings(&config.sentinel);
//! let result = run_hunting_query(&arm, &workspace, "Heartbeat | take 5", None).await?;
//! ```

pub mod app_registration;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod hunting;
pub mod kql;

pub use error::{Result, SentinelError};
