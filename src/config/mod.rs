//! Sync engine configuration.

use crate::constants::{
    API_TOKEN_ENV_VAR, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH, DEFAULT_LOCK_NAME,
    DEFAULT_LOCK_TTL_SECS, DEFAULT_PAGE_SIZE, DEFAULT_REMOTE_TIMEOUT_SECS, DEFAULT_STORAGE_PATH,
};
use crate::entity::EntityType;
use crate::error::{SyncError, SyncResult};
use crate::strategy::StrategyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Connection settings for the remote CRM API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Bearer token; `PIPELINER_API_TOKEN` takes precedence when set
    pub api_token: Option<String>,
    /// Request-level timeout applied by the HTTP client
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }
}

impl RemoteConfig {
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.api_token = Some(token);
        }
    }
}

/// Configuration for one sync deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Path of the sled database holding lock, cursors and local records
    pub storage_path: PathBuf,
    pub lock_name: String,
    /// Seconds after which an unrefreshed lock may be taken over
    pub lock_ttl_secs: u64,
    pub page_size: usize,
    /// Names run when no `--strategy` is given; empty runs every registered strategy
    pub default_strategies: Vec<String>,
    /// Extra name → identity mappings merged over the built-in short names
    pub strategy_aliases: BTreeMap<String, StrategyId>,
    /// Organizational units in scope; a change invalidates all cursors
    pub enabled_scopes: Vec<String>,
    pub remote: RemoteConfig,
    pub required_fields: BTreeMap<EntityType, Vec<String>>,
    pub log_level: String,
    /// Log file used by quiet runs
    pub log_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            default_strategies: Vec::new(),
            strategy_aliases: BTreeMap::new(),
            enabled_scopes: Vec::new(),
            remote: RemoteConfig::default(),
            required_fields: BTreeMap::new(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl SyncConfig {
    /// Create a configuration with the specified storage path
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.lock_name.trim().is_empty() {
            return Err(SyncError::Configuration(
                "lock_name must not be empty".to_string(),
            ));
        }
        if self.lock_ttl_secs == 0 {
            return Err(SyncError::Configuration(
                "lock_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(SyncError::Configuration(
                "page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn parse(path: &Path, contents: &str) -> SyncResult<Self> {
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed = if is_toml {
            toml::from_str::<SyncConfig>(contents).map_err(|e| e.to_string())
        } else {
            serde_json::from_str::<SyncConfig>(contents).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            log::error!("Failed to parse sync configuration {}: {}", path.display(), e);
            SyncError::Configuration(format!("Invalid config file {}: {}", path.display(), e))
        })
    }
}

/// Load sync configuration from `path`, or from the `PIPELINER_SYNC_CONFIG`
/// environment variable, or from `config/sync_config.json`.
///
/// A missing file yields the default configuration. Files ending in `.toml`
/// are parsed as TOML, anything else as JSON. The API token may be
/// overridden through `PIPELINER_API_TOKEN`.
pub fn load_sync_config(path: Option<&str>) -> SyncResult<SyncConfig> {
    let config_path = path
        .map(|p| p.to_string())
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config_path = PathBuf::from(config_path);

    let mut config = match std::fs::read_to_string(&config_path) {
        Ok(contents) => SyncConfig::parse(&config_path, &contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!(
                "No sync configuration at {}, using defaults",
                config_path.display()
            );
            SyncConfig::default()
        }
        Err(e) => return Err(SyncError::Io(e)),
    };

    config
        .remote
        .apply_token_override(std::env::var(API_TOKEN_ENV_VAR).ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = load_sync_config(path.to_str()).unwrap();
        assert_eq!(config.lock_name, DEFAULT_LOCK_NAME);
        assert_eq!(config.lock_ttl_secs, DEFAULT_LOCK_TTL_SECS);
        assert!(config.default_strategies.is_empty());
    }

    #[test]
    fn json_config_with_aliases_and_required_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(
            &path,
            r#"{
                "lock_name": "crm-sync",
                "page_size": 25,
                "default_strategies": ["push-opportunity", "deals"],
                "strategy_aliases": { "deals": "PullOpportunityStrategy" },
                "required_fields": { "contact": ["email"] },
                "remote": { "base_url": "https://crm.example.com/api" }
            }"#,
        )
        .unwrap();

        let config = load_sync_config(path.to_str()).unwrap();
        assert_eq!(config.lock_name, "crm-sync");
        assert_eq!(config.page_size, 25);
        assert_eq!(
            config.strategy_aliases.get("deals"),
            Some(&StrategyId::pull(EntityType::Opportunity))
        );
        assert_eq!(
            config.required_fields.get(&EntityType::Contact),
            Some(&vec!["email".to_string()])
        );
        assert_eq!(config.remote.timeout_secs, DEFAULT_REMOTE_TIMEOUT_SECS);
    }

    #[test]
    fn toml_config_is_detected_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(
            &path,
            "lock_ttl_secs = 600\nenabled_scopes = [\"emea\"]\n\n[remote]\nbase_url = \"http://localhost:9000\"\ntimeout_secs = 5\n",
        )
        .unwrap();

        let config = load_sync_config(path.to_str()).unwrap();
        assert_eq!(config.lock_ttl_secs, 600);
        assert_eq!(config.enabled_scopes, vec!["emea".to_string()]);
        assert_eq!(config.remote.timeout_secs, 5);
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_sync_config(path.to_str()).unwrap_err().is_configuration());
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        assert!(SyncConfig::default().validate().is_ok());
        let zero_ttl = SyncConfig {
            lock_ttl_secs: 0,
            ..Default::default()
        };
        assert!(zero_ttl.validate().is_err());
        let zero_page = SyncConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(zero_page.validate().is_err());
        let blank_lock = SyncConfig {
            lock_name: " ".to_string(),
            ..Default::default()
        };
        assert!(blank_lock.validate().is_err());
    }

    #[test]
    fn token_override_ignores_blank_values() {
        let mut remote = RemoteConfig {
            api_token: Some("from-file".to_string()),
            ..Default::default()
        };
        remote.apply_token_override(Some(" ".to_string()));
        assert_eq!(remote.api_token.as_deref(), Some("from-file"));
        remote.apply_token_override(Some("from-env".to_string()));
        assert_eq!(remote.api_token.as_deref(), Some("from-env"));
    }
}
