use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const ENV_DATABASE_PATH: &str = "CARD_LEDGER_DB";
pub const ENV_BUSY_TIMEOUT_MS: &str = "CARD_LEDGER_BUSY_TIMEOUT_MS";

/// Runtime settings for the SQLite-backed ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long a batch waits for another writer's lock before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_wal")]
    pub wal: bool,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("card_ledger.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_wal() -> bool {
    true
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            wal: default_wal(),
        }
    }
}

impl LedgerConfig {
    /// Read a JSON config file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults (or `file`, when given) overridden by environment variables
    pub fn from_env(file: Option<&Path>) -> Result<Self> {
        let base = match file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(timeout) = lookup(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms = timeout
                .trim()
                .parse()
                .with_context(|| format!("{} must be an integer, got {:?}", ENV_BUSY_TIMEOUT_MS, timeout))?;
        }
        Ok(self)
    }
}
