//! Run configuration.
//!
//! Settings come from environment variables (or a `.env` file via `dotenvy`),
//! with CLI flags overriding the file paths. The request parameters for the
//! statistics API live in a separate JSON file whose absence is fatal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{EtlError, Result};

pub const DEFAULT_STATS_API_URL: &str = "https://b2b.itresume.ru/api/statistics";
pub const DEFAULT_SPREADSHEET_NAME: &str = "Report";

#[derive(Debug, Clone)]
pub struct Config {
    /// Only `run` without `--dry-run`, `init-db` and `stats` need a database.
    pub database_url: Option<String>,
    pub database_connect_timeout: Duration,
    pub database_statement_timeout: Duration,
    pub stats_api_url: String,
    pub params_file: PathBuf,
    pub http_timeout: Duration,
    pub http_max_attempts: u32,
    pub credentials_file: PathBuf,
    pub spreadsheet_name: String,
    pub sheets_api_url: String,
    pub drive_api_url: String,
}

impl Config {
    /// Loads settings from the environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_connect_timeout: Duration::from_secs(parse_env(
                "DATABASE_CONNECT_TIMEOUT_SECS",
                10,
            )),
            database_statement_timeout: Duration::from_secs(parse_env(
                "DATABASE_STATEMENT_TIMEOUT_SECS",
                30,
            )),
            stats_api_url: env_or("STATS_API_URL", DEFAULT_STATS_API_URL),
            params_file: PathBuf::from(env_or("PARAMS_FILE", "params.json")),
            http_timeout: Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS", 30)),
            http_max_attempts: parse_env("HTTP_MAX_ATTEMPTS", 3).max(1),
            credentials_file: PathBuf::from(env_or("GOOGLE_CREDENTIALS_FILE", "creds.json")),
            spreadsheet_name: env_or("REPORT_SPREADSHEET_NAME", DEFAULT_SPREADSHEET_NAME),
            sheets_api_url: env_or("SHEETS_API_URL", "https://sheets.googleapis.com"),
            drive_api_url: env_or("DRIVE_API_URL", "https://www.googleapis.com"),
        }
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| EtlError::Config("DATABASE_URL must be set".into()))
    }
}

/// Reads the statistics API query parameters.
///
/// The file must hold a single JSON object. String values are sent verbatim,
/// other scalars in their JSON text form. Nested values are rejected.
pub fn load_params(path: &Path) -> Result<Vec<(String, String)>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EtlError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_params(&raw)
        .map_err(|message| EtlError::Config(format!("{}: {message}", path.display())))
}

fn parse_params(raw: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let map: Map<String, Value> =
        serde_json::from_str(raw).map_err(|e| format!("expected a JSON object: {e}"))?;

    map.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(format!("parameter `{key}` must be a scalar"));
                }
            };
            Ok((key, text))
        })
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
