use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub extraction: ExtractionConfig,
    pub health: HealthConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: String,
    pub pid_path: String,
    pub log_path: String,
    pub log_level: String,
    /// Idle time allowed between requests on one connection.
    pub read_timeout_ms: u64,
    /// Upper bound on a single dispatched operation.
    pub request_timeout_ms: u64,
    /// How long draining waits for in-flight connections.
    pub drain_timeout_ms: u64,
    /// Longest accepted request line; longer lines are rejected.
    pub max_line_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Run migrations at startup instead of refusing to start on a missing schema.
    pub auto_init: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enabled: bool,
    pub api_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub min_messages: usize,
    pub max_messages: usize,
    pub min_transcript_chars: usize,
    pub max_message_chars: usize,
    pub timeout_secs: u64,
    pub dedup_threshold: f64,
    /// How many existing learnings are fetched as deduplication context.
    pub existing_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            extraction: ExtractionConfig::default(),
            health: HealthConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let dir = default_daemon_dir();
        Self {
            socket_path: dir.join("daemon.sock").to_string_lossy().into_owned(),
            pid_path: dir.join("daemon.pid").to_string_lossy().into_owned(),
            log_path: dir
                .join("logs")
                .join("daemon.log")
                .to_string_lossy()
                .into_owned(),
            log_level: "info".into(),
            read_timeout_ms: 10_000,
            request_timeout_ms: 8_000,
            drain_timeout_ms: 5_000,
            max_line_bytes: 65_536,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_daemon_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            auto_init: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 3,
            acquire_timeout_ms: 3_000,
            connect_timeout_ms: 3_000,
            statement_timeout_ms: 5_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            model: "gpt-5.1-mini".into(),
            min_messages: 10,
            max_messages: 50,
            min_transcript_chars: 500,
            max_message_chars: 2000,
            timeout_secs: 30,
            dedup_threshold: 0.6,
            existing_limit: 100,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout_ms: 500 }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Returns `~/.claude/`
pub fn default_daemon_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".claude")
}

/// Returns the default config file path: `~/.claude/memoryd.toml`
pub fn default_config_path() -> PathBuf {
    default_daemon_dir().join("memoryd.toml")
}

impl DaemonConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            DaemonConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MEMORYD_DB, MEMORYD_SOCKET,
    /// MEMORYD_LOG_LEVEL, EXTRACTION_MODEL, AUTO_EXTRACT_LEARNINGS).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMORYD_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMORYD_SOCKET") {
            self.server.socket_path = val;
        }
        if let Ok(val) = std::env::var("MEMORYD_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("EXTRACTION_MODEL") {
            self.extraction.model = val;
        }
        if let Ok(val) = std::env::var("AUTO_EXTRACT_LEARNINGS") {
            self.extraction.enabled = !val.eq_ignore_ascii_case("false");
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pool.max_size >= 1, "pool.max_size must be at least 1");
        anyhow::ensure!(
            self.pool.min_size <= self.pool.max_size,
            "pool.min_size ({}) exceeds pool.max_size ({})",
            self.pool.min_size,
            self.pool.max_size
        );
        anyhow::ensure!(self.queue.capacity >= 1, "queue.capacity must be at least 1");
        anyhow::ensure!(self.server.max_line_bytes >= 1, "server.max_line_bytes must be at least 1");
        anyhow::ensure!(self.health.interval_secs >= 1, "health.interval_secs must be at least 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.extraction.dedup_threshold),
            "extraction.dedup_threshold must be between 0.0 and 1.0"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_socket_path(&self) -> PathBuf {
        expand_tilde(&self.server.socket_path)
    }

    pub fn resolved_pid_path(&self) -> PathBuf {
        expand_tilde(&self.server.pid_path)
    }

    pub fn resolved_log_path(&self) -> PathBuf {
        expand_tilde(&self.server.log_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.pool.min_size, 1);
        assert_eq!(config.pool.max_size, 3);
        assert_eq!(config.pool.acquire_timeout_ms, 3_000);
        assert_eq!(config.pool.statement_timeout_ms, 5_000);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.health.interval_secs, 30);
        assert_eq!(config.client.timeout_ms, 500);
        assert!(config.server.socket_path.ends_with("daemon.sock"));
        assert!(config.storage.db_path.ends_with("memory.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"
socket_path = "/tmp/memoryd-test.sock"

[pool]
max_size = 5

[queue]
capacity = 100

[extraction]
dedup_threshold = 0.75
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.socket_path, "/tmp/memoryd-test.sock");
        assert_eq!(config.pool.max_size, 5);
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.extraction.dedup_threshold, 0.75);
        // defaults still apply for unset fields
        assert_eq!(config.pool.min_size, 1);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn validate_rejects_inverted_pool_bounds() {
        let mut config = DaemonConfig::default();
        config.pool.min_size = 4;
        config.pool.max_size = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = DaemonConfig::default();
        std::env::set_var("MEMORYD_DB", "/tmp/override.db");
        std::env::set_var("MEMORYD_LOG_LEVEL", "trace");
        std::env::set_var("AUTO_EXTRACT_LEARNINGS", "FALSE");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert!(!config.extraction.enabled);

        // Clean up
        std::env::remove_var("MEMORYD_DB");
        std::env::remove_var("MEMORYD_LOG_LEVEL");
        std::env::remove_var("AUTO_EXTRACT_LEARNINGS");
    }
}
