use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_common::{Error, Result};
use strata_security::IdentifierValidator;

/// Top-level configuration, usually read from `strata.yml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub log: LogConfig,
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db/strata.sqlite3"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("db/migrate"),
        }
    }
}

/// Names of the tables holding the migration history and the run lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub table: String,
    pub lock_table: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            table: "schema_migrations".to_string(),
            lock_table: "schema_migrations_lock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wrap each step in a transaction when the database supports transactional DDL.
    pub transactional: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            transactional: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        IdentifierValidator::validate_identifier(&self.log.table)
            .map_err(|e| Error::Config(format!("log.table: {e}")))?;
        IdentifierValidator::validate_identifier(&self.log.lock_table)
            .map_err(|e| Error::Config(format!("log.lock_table: {e}")))?;
        if self.log.table == self.log.lock_table {
            return Err(Error::Config(
                "log.table and log.lock_table must differ".to_string(),
            ));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Config("database.path cannot be empty".to_string()));
        }
        Ok(())
    }
}
