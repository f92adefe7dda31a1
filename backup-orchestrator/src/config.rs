//! Configuration management for the orchestrator.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`BACKUP__<SECTION>__<KEY>`, e.g. `BACKUP__PURGE__GRACE_PERIOD_DAYS=30`).

use crate::monitoring::MonitoringProvider;
use crate::storage::{LocalStorage, Storage, StorageProvider};
use crate::utils::{OrchestratorError, Result};
use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ENV_PREFIX: &str = "BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub restore: RestoreConfig,
    pub purge: PurgeConfig,
    pub monitoring: MonitoringConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend type (local, s3, gcs, azure)
    #[serde(default = "default_provider")]
    pub provider: StorageProvider,

    /// Root directory of the local backend
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    /// Key prefix shared by every object of this cluster
    #[serde(default)]
    pub prefix: Option<String>,

    /// Identity of this node in backup paths
    #[serde(default = "default_fqdn")]
    pub fqdn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Environment variable holding the restore topology mapping
    #[serde(default = "default_mapping_env")]
    pub mapping_env: String,

    /// Where restored data is staged for loading
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,

    /// Continue past a failing node and fail the run at the end
    #[serde(default)]
    pub isolate_node_failures: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub provider: MonitoringProvider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_provider() -> StorageProvider {
    StorageProvider::Local
}

fn default_base_path() -> PathBuf {
    PathBuf::from("/mnt/backups")
}

fn default_bucket_name() -> String {
    "cluster-backups".to_string()
}

fn default_fqdn() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_mapping_env() -> String {
    "RESTORE_MAPPING".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/var/lib/backup-orchestrator/restore")
}

fn default_grace_period_days() -> i64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_path: default_base_path(),
            bucket_name: default_bucket_name(),
            prefix: None,
            fqdn: default_fqdn(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            mapping_env: default_mapping_env(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            isolate_node_failures: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(OrchestratorError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder
            .add_source(env)
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}

impl StorageConfig {
    /// Storage client for the configured backend.
    pub fn build(&self) -> Result<Arc<dyn Storage>> {
        match self.provider {
            StorageProvider::Local => Ok(Arc::new(LocalStorage::new(
                self.base_path.join(&self.bucket_name),
                self.prefix.as_deref(),
            ))),
            other => Err(OrchestratorError::Config(format!(
                "No {} storage client in this build, use provider = \"local\"",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(Some(HashMap::new()))
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load_with_env(None, no_env()).unwrap();
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert_eq!(config.purge.grace_period_days, 10);
        assert!(!config.purge.isolate_node_failures);
        assert_eq!(config.restore.mapping_env, "RESTORE_MAPPING");
        assert_eq!(config.monitoring.provider, MonitoringProvider::Log);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_file_and_env_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("orchestrator.toml");
        std::fs::write(
            &path,
            r#"
[storage]
base_path = "/srv/backups"
bucket_name = "prod"
prefix = "cluster-a"
fqdn = "node1.example.com"

[purge]
grace_period_days = 3
"#,
        )
        .unwrap();

        let env = Environment::with_prefix(ENV_PREFIX).separator("__").source(Some(HashMap::from([(
            "BACKUP__PURGE__ISOLATE_NODE_FAILURES".to_string(),
            "true".to_string(),
        )])));
        let config = Config::load_with_env(Some(&path), env.try_parsing(true)).unwrap();

        assert_eq!(config.storage.base_path, PathBuf::from("/srv/backups"));
        assert_eq!(config.storage.prefix.as_deref(), Some("cluster-a"));
        assert_eq!(config.storage.fqdn, "node1.example.com");
        assert_eq!(config.purge.grace_period_days, 3);
        assert!(config.purge.isolate_node_failures);
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let result = Config::load_with_env(Some(Path::new("/nonexistent/orchestrator.toml")), no_env());
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_to_toml_renders_sections() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[storage]"));
        assert!(rendered.contains("grace_period_days = 10"));
    }

    #[test]
    fn test_only_local_storage_is_built() {
        let mut storage = StorageConfig::default();
        assert_eq!(storage.build().unwrap().provider(), StorageProvider::Local);
        storage.provider = StorageProvider::S3;
        assert!(matches!(storage.build(), Err(OrchestratorError::Config(_))));
    }
}
