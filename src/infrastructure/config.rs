use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::value_objects::TableName;

/// Prefix of environment overrides, e.g. `SHEETSYNC_IMPORT__BATCH_SIZE=50`.
pub const ENV_PREFIX: &str = "SHEETSYNC";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub import: ImportSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON document backing the file store adapter.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "store.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportSettings {
    /// Table imports write to when the host has not signalled one.
    #[serde(default)]
    pub target_table: Option<String>,
    #[serde(default = "default_rules_table")]
    pub rules_table: String,
    #[serde(default = "default_log_table")]
    pub log_table: String,
    /// Mutations per host call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Rows inspected by pre-import validation.
    #[serde(default = "default_validation_sample")]
    pub validation_sample: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            target_table: None,
            rules_table: default_rules_table(),
            log_table: default_log_table(),
            batch_size: default_batch_size(),
            validation_sample: default_validation_sample(),
        }
    }
}

fn default_rules_table() -> String {
    "RULES_CONFIG".to_string()
}

fn default_log_table() -> String {
    "IMPORT_LOG".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_validation_sample() -> usize {
    50
}

impl ImportSettings {
    pub fn rules_table(&self) -> TableName {
        TableName(self.rules_table.clone())
    }

    pub fn log_table(&self) -> TableName {
        TableName(self.log_table.clone())
    }

    pub fn target_table(&self) -> Option<TableName> {
        self.target_table
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(TableName::new)
    }
}

impl AppConfig {
    /// Load a TOML file, then apply `SHEETSYNC_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cfg = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        cfg.try_deserialize()
            .with_context(|| "Failed to parse config TOML")
    }

    /// Load from the default location when it exists, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

/// `<config_dir>/sheetsync/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sheetsync").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file).unwrap();
        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.import.batch_size, 100);
        assert_eq!(cfg.import.rules_table, "RULES_CONFIG");
        assert_eq!(cfg.import.log_table, "IMPORT_LOG");
        assert_eq!(cfg.import.target_table(), None);
        assert_eq!(cfg.store.path, "store.json");
    }

    #[test]
    fn reads_import_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[store]\npath = \"data/doc.json\"\n\n[import]\ntarget_table = \"Contacts\"\nbatch_size = 25"
        )
        .unwrap();
        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.import.target_table(), Some(TableName::new("Contacts")));
        assert_eq!(cfg.import.batch_size, 25);
        assert_eq!(cfg.store.path, "data/doc.json");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(AppConfig::load("/definitely/not/here.toml").is_err());
    }
}
