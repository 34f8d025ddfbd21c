//! Synchronization settings.
//!
//! # Responsibility
//! - Hold channel naming, table names and store retry policy.
//! - Load settings from JSON with per-field defaults and validate them.
//!
//! # Invariants
//! - A validated config has non-blank identifiers, distinct tables and a
//!   non-zero retry delay.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "realtime";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PRIMARY_TABLE: &str = "leads";
pub const DEFAULT_SECONDARY_TABLE: &str = "contact_entities";
pub const DEFAULT_EMPTY_RETRY_DELAY_MS: u64 = 1_500;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier regex"));
static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").expect("valid namespace regex"));

/// Configuration load/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Settings shared by the store, the channel adapter and the binder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Prefix of every channel id.
    pub namespace: String,
    pub schema: String,
    /// Lead identity table.
    pub primary_table: String,
    /// Lead detail table.
    pub secondary_table: String,
    /// Delay before the one-shot retry after an empty first load.
    pub empty_retry_delay_ms: u64,
    /// Keep the last list when a visible refetch fails instead of clearing it.
    pub keep_stale_on_error: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            primary_table: DEFAULT_PRIMARY_TABLE.to_string(),
            secondary_table: DEFAULT_SECONDARY_TABLE.to_string(),
            empty_retry_delay_ms: DEFAULT_EMPTY_RETRY_DELAY_MS,
            keep_stale_on_error: true,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON document; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !NAMESPACE_RE.is_match(&self.namespace) {
            return Err(ConfigError::Invalid(format!(
                "namespace `{}` must be lowercase alphanumeric, `_` or `-`",
                self.namespace
            )));
        }
        for (field, value) in [
            ("schema", &self.schema),
            ("primary_table", &self.primary_table),
            ("secondary_table", &self.secondary_table),
        ] {
            if !IDENTIFIER_RE.is_match(value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} `{value}` is not a valid identifier"
                )));
            }
        }
        if self.primary_table == self.secondary_table {
            return Err(ConfigError::Invalid(
                "primary_table and secondary_table must differ".to_string(),
            ));
        }
        if self.empty_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "empty_retry_delay_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn empty_retry_delay(&self) -> Duration {
        Duration::from_millis(self.empty_retry_delay_ms)
    }
}
