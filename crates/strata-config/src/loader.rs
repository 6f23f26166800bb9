use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// File names probed in the working directory, in order.
const LOCAL_CANDIDATES: &[&str] = &["strata.yml", "strata.yaml", "strata.toml"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a config file, picking the parser from its extension.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: AppConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        config.validate()?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Find a config file in the working directory or the user config dir.
    /// Falls back to defaults when none exists.
    pub fn discover() -> Result<(AppConfig, Option<PathBuf>)> {
        for candidate in Self::candidates() {
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok((config, Some(candidate)));
            }
        }
        debug!("no config file found, using defaults");
        Ok((AppConfig::default(), None))
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = LOCAL_CANDIDATES.iter().map(PathBuf::from).collect();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("strata").join("config.yml"));
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigLoader;

    #[test]
    fn loads_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.yml");
        std::fs::write(
            &path,
            "database:\n  path: /tmp/app.sqlite3\nrunner:\n  transactional: false\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.database.path.to_str(), Some("/tmp/app.sqlite3"));
        assert!(!config.runner.transactional);
    }

    #[test]
    fn loads_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            "[log]\ntable = \"history\"\n\n[logging]\njson = true\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.log.table, "history");
        assert_eq!(config.log.lock_table, "schema_migrations_lock");
        assert!(config.logging.json);
    }

    #[test]
    fn rejects_unknown_extension_and_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.ini");
        std::fs::write(&path, "").unwrap();
        assert!(ConfigLoader::load(&path).is_err());

        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "log:\n  table: \"bad name\"\n").unwrap();
        assert!(ConfigLoader::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load(&dir.path().join("absent.yml")).unwrap_err();
        assert!(err.to_string().starts_with("configuration error"));
    }
}
