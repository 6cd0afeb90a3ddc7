//! CLI entry point for sentinel-hunt.
//!
//! Loads configuration (optional TOML file, then environment and `.env`),
//! builds Graph and ARM clients, and dispatches one subcommand. Results are
//! printed to stdout as pretty JSON; logs go to stderr (`RUST_LOG` controls
//! verbosity).
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (configuration, auth, API, validation, etc.)
//! - 2: argument validation error (clap handles this automatically)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sentinel_hunt::app_registration::{add_sentinel_permissions, register_with_sentinel_access};
use sentinel_hunt::client::AzureClient;
use sentinel_hunt::config::Config;
use sentinel_hunt::graph::get_application_info;
use sentinel_hunt::hunting::{
    create_query_from_file, create_query_from_input, list_hunting_queries, run_hunting_query,
    HuntingQuery, Workspace, DEFAULT_TIMESPAN,
};
use sentinel_hunt::Result;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Environment variables override its values.
    #[arg(long, env = "SENTINEL_HUNT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an application and request Sentinel permissions for it.
    RegisterApp {
        #[arg(long)]
        name: String,

        /// Web redirect URI. Repeat for several.
        #[arg(long = "redirect-uri")]
        redirect_uris: Vec<String>,
    },

    /// Request Sentinel permissions for an existing application.
    AddSentinelPermissions {
        /// Application object ID. Defaults to the configured client's
        /// own registration.
        #[arg(long)]
        object_id: Option<String>,
    },

    /// Show the configured client's application registration.
    AppInfo,

    /// List hunting queries in the workspace.
    List,

    /// Create or overwrite a hunting query.
    Create {
        #[arg(long)]
        display_name: String,

        #[arg(long)]
        query: String,

        #[arg(long, default_value = "")]
        description: String,

        /// MITRE ATT&CK tactic. Repeat for several.
        #[arg(long = "tactic")]
        tactics: Vec<String>,

        /// MITRE ATT&CK technique. Repeat for several.
        #[arg(long = "technique")]
        techniques: Vec<String>,
    },

    /// Create or overwrite a hunting query from an annotated .kql file.
    CreateFromFile { file: PathBuf },

    /// Run KQL against the workspace.
    Run {
        #[arg(long)]
        query: String,

        /// ISO-8601 duration or interval.
        #[arg(long, default_value = DEFAULT_TIMESPAN)]
        timespan: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let workspace = Workspace::from_settings(&config.sentinel);

    match cli.command {
        Command::RegisterApp {
            name,
            redirect_uris,
        } => {
            let graph = AzureClient::graph(config.credential())?;
            let registered = register_with_sentinel_access(&graph, &name, &redirect_uris).await?;
            print_json(&registered)
        }
        Command::AddSentinelPermissions { object_id } => {
            let graph = AzureClient::graph(config.credential())?;
            let object_id = match object_id {
                Some(id) => id,
                None => get_application_info(&graph, &config.azure.client_id).await?.id,
            };
            let success = add_sentinel_permissions(&graph, &object_id).await?;
            print_json(&serde_json::json!({
                "success": success,
                "message": "Sentinel permissions requested; grant admin consent in the Entra portal",
            }))
        }
        Command::AppInfo => {
            let graph = AzureClient::graph(config.credential())?;
            print_json(&get_application_info(&graph, &config.azure.client_id).await?)
        }
        Command::List => {
            let arm = AzureClient::management(config.credential())?;
            print_json(&list_hunting_queries(&arm, &workspace).await?)
        }
        Command::Create {
            display_name,
            query,
            description,
            tactics,
            techniques,
        } => {
            let data = HuntingQuery {
                display_name,
                query,
                description,
                tactics,
                techniques,
            };
            let arm = AzureClient::management(config.credential())?;
            print_json(&create_query_from_input(&arm, &workspace, &data).await?)
        }
        Command::CreateFromFile { file } => {
            let arm = AzureClient::management(config.credential())?;
            print_json(&create_query_from_file(&arm, &workspace, &file).await?)
        }
        Command::Run { query, timespan } => {
            let arm = AzureClient::management(config.credential())?;
            print_json(&run_hunting_query(&arm, &workspace, &query, Some(&timespan)).await?)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["sentinel-hunt"]).is_err());
    }

    #[test]
    fn register_app_collects_repeated_redirect_uris() {
        let cli = Cli::try_parse_from([
            "sentinel-hunt",
            "register-app",
            "--name",
            "Hunting App",
            "--redirect-uri",
            "https://localhost/a",
            "--redirect-uri",
            "https://localhost/b",
        ])
        .expect("should parse register-app");
        match cli.command {
            Command::RegisterApp {
                name,
                redirect_uris,
            } => {
                assert_eq!(name, "Hunting App");
                assert_eq!(redirect_uris, vec!["https://localhost/a", "https://localhost/b"]);
            }
            _ => panic!("expected register-app"),
        }
    }

    #[test]
    fn create_requires_display_name_and_query() {
        assert!(Cli::try_parse_from(["sentinel-hunt", "create", "--query", "T"]).is_err());
        assert!(Cli::try_parse_from(["sentinel-hunt", "create", "--display-name", "N"]).is_err());
    }

    #[test]
    fn create_parses_tactics_and_techniques() {
        let cli = Cli::try_parse_from([
            "sentinel-hunt",
            "create",
            "--display-name",
            "Detect X",
            "--query",
            "SecurityEvent | take 1",
            "--tactic",
            "Execution",
            "--technique",
            "T1059",
            "--technique",
            "T1106",
        ])
        .expect("should parse create");
        match cli.command {
            Command::Create {
                description,
                tactics,
                techniques,
                ..
            } => {
                assert_eq!(description, "");
                assert_eq!(tactics, vec!["Execution"]);
                assert_eq!(techniques, vec!["T1059", "T1106"]);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn run_defaults_timespan_to_one_day() {
        let cli = Cli::try_parse_from(["sentinel-hunt", "run", "--query", "Heartbeat"])
            .expect("should parse run");
        match cli.command {
            Command::Run { timespan, .. } => assert_eq!(timespan, "P1D"),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn config_flag_is_global_before_subcommand() {
        let cli = Cli::try_parse_from(["sentinel-hunt", "--config", "soc.toml", "list"])
            .expect("should parse --config");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("soc.toml")));
        assert!(matches!(cli.command, Command::List));
    }
}
