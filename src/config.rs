use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub reports: ReportsConfig,
    pub crm: CrmConfig,
    pub pipedrive: PipedriveConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cached_data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    /// SQLite mirror of the CRM holding the `Organisation` table.
    pub database: PathBuf,
    /// Bulk client export used by the prolongation flow.
    pub snapshot: PathBuf,
    pub snapshot_key_column: usize,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("crmdbsync/crm.sqlite3"),
            snapshot: PathBuf::from("crmdbsync/all_clients.csv"),
            snapshot_key_column: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipedriveConfig {
    pub base_url: String,
    /// Key of the custom organisation field holding the tax id.
    pub inn_field_key: String,
    pub timeout_seconds: u64,
}

impl Default for PipedriveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.pipedrive.com".to_string(),
            inn_field_key: "7a39d86c8364a65f52792bbc9fd40c8a9ddae525".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub progress_every: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { progress_every: 1000 }
    }
}

impl Config {
    /// Loads `path`, or `config.toml` when no path is given. Only the
    /// default file may be absent, in which case defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !config_path.exists() {
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            PipelineError::Configuration(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// `PIPEDRIVE_API_TOKEN`, after `.env` has been loaded.
    pub fn pipedrive_token() -> Result<String> {
        Ok(std::env::var("PIPEDRIVE_API_TOKEN")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.storage.dir, PathBuf::from("cached_data"));
        assert_eq!(config.crm.snapshot_key_column, 7);
        assert_eq!(config.run.progress_every, 1000);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [storage]
            dir = "/var/lib/registry"

            [pipedrive]
            timeout_seconds = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.dir, PathBuf::from("/var/lib/registry"));
        assert_eq!(config.pipedrive.timeout_seconds, 5);
        assert_eq!(config.pipedrive.base_url, "https://api.pipedrive.com");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/config.toml"))).is_err());
    }
}
