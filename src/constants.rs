/// Common constants used across the sync engine.
///
/// These defaults are used for command line arguments and
/// configuration when explicit values are not provided.
pub const DEFAULT_LOCK_NAME: &str = "pipeliner-sync";
pub const DEFAULT_LOCK_TTL_SECS: u64 = 3600;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_STORAGE_PATH: &str = "data/pipeliner_sync";
pub const DEFAULT_CONFIG_PATH: &str = "config/sync_config.json";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATUS_OWNER: &str = "system";

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "PIPELINER_SYNC_CONFIG";
/// Environment variable that overrides the remote API token
pub const API_TOKEN_ENV_VAR: &str = "PIPELINER_API_TOKEN";

/// Lines kept by the background logger
pub const LOG_BUFFER_CAPACITY: usize = 1000;
