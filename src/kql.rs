//! Parser for annotated `.kql` files.
//!
//! A hunting query file carries its metadata in comment lines ahead of the
//! query itself:
//!
//! ```text
//! // Metadata:
//! // Name: Rare process on domain controller
//! // Description: Processes seen once in 14 days
//! // Tactics: Execution, Persistence
//! // Techniques: T1059, T1543
//! // Query:
//! SecurityEvent
//! | where EventID == 4688
//! ```
//!
//! The scan is a three-state machine (`Idle`, `InMetadata`, `InQuery`)
//! driven by the two marker lines. Text before the first marker is ignored.
//! Once `// Query:` is seen every following line belongs to the query,
//! blank lines included, unless another marker switches state again.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Result, SentinelError};
use crate::hunting::HuntingQuery;

const METADATA_MARKER: &str = "// Metadata:";
const QUERY_MARKER: &str = "// Query:";

/// The structured content of a `.kql` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedKqlFile {
    pub name: String,
    pub description: String,
    pub tactics: Vec<String>,
    pub techniques: Vec<String>,
    pub query: String,
    /// Any other `// Key: Value` metadata, keyed by lower-cased key.
    pub metadata: BTreeMap<String, String>,
}

impl From<ParsedKqlFile> for HuntingQuery {
    fn from(parsed: ParsedKqlFile) -> Self {
        HuntingQuery {
            display_name: parsed.name,
            query: parsed.query,
            description: parsed.description,
            tactics: parsed.tactics,
            techniques: parsed.techniques,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InMetadata,
    InQuery,
}

fn metadata_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//\s*(\w+):\s*(.*)").expect("static regex is valid"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses KQL file content. `source` only supplies the fallback name when
/// the metadata has none; nothing is read from disk.
pub fn parse_kql(content: &str, source: &Path) -> ParsedKqlFile {
    let mut state = State::Idle;
    let mut name = None;
    let mut description = None;
    let mut tactics = Vec::new();
    let mut techniques = Vec::new();
    let mut metadata = BTreeMap::new();
    let mut query_lines: Vec<&str> = Vec::new();

    for line in content.lines() {
        match line.trim() {
            METADATA_MARKER => {
                state = State::InMetadata;
                continue;
            }
            QUERY_MARKER => {
                state = State::InQuery;
                continue;
            }
            _ => {}
        }

        match state {
            State::Idle => {}
            State::InMetadata => {
                let Some(caps) = metadata_line().captures(line) else {
                    continue;
                };
                let key = caps[1].to_lowercase();
                let value = caps[2].trim();
                match key.as_str() {
                    "tactics" => tactics = split_list(value),
                    "techniques" => techniques = split_list(value),
                    "name" => name = Some(value.to_string()),
                    "description" => description = Some(value.to_string()),
                    _ => {
                        metadata.insert(key.clone(), value.to_string());
                    }
                }
            }
            State::InQuery => query_lines.push(line),
        }
    }

    let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| {
        source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    ParsedKqlFile {
        name,
        description: description.unwrap_or_default(),
        tactics,
        techniques,
        query: query_lines.join("\n").trim().to_string(),
        metadata,
    }
}

/// Reads and parses a `.kql` file.
pub fn parse_kql_file(path: &Path) -> Result<ParsedKqlFile> {
    let content = std::fs::read_to_string(path).map_err(|source| SentinelError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_kql(&content, path))
}
