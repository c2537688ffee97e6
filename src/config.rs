use anyhow::{ensure, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for Tasker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskerConfig {
    /// Distributed lock settings
    pub locking: LockingConfig,
    /// Mutation coordinator settings
    pub coordinator: CoordinatorConfig,
    /// Read cache settings
    pub cache: CacheConfig,
    /// Notification delivery settings
    pub notifications: NotificationConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockingConfig {
    /// Lock lifetime; a crashed holder blocks the task for at most this long
    pub ttl_seconds: u64,
    /// Prefix applied to every lock key in the shared store
    pub key_prefix: String,
}

impl LockingConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Attempts for retry-on-stale updates, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts
    pub retry_backoff_millis: u64,
    /// Time allowed for event subscribers to drain on shutdown
    pub shutdown_drain_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum entries per cache
    pub max_capacity: u64,
    /// Single task entries
    pub task_ttl_seconds: u64,
    /// Team task lists
    pub team_tasks_ttl_seconds: u64,
    /// Per-user assigned task lists
    pub user_tasks_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Send e-mail for assignment and deletion notices
    pub email_enabled: bool,
    /// Sustained e-mail rate
    pub emails_per_second: u32,
    /// E-mail burst capacity
    pub email_burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON logs instead of human-readable lines
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30,
            key_prefix: "tasker:lock:".to_string(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_millis: 50,
            shutdown_drain_seconds: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            task_ttl_seconds: 3600,       // 1 hour
            team_tasks_ttl_seconds: 300,  // 5 minutes
            user_tasks_ttl_seconds: 900,  // 15 minutes
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email_enabled: true,
            emails_per_second: 10,
            email_burst: 20,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl Default for TaskerConfig {
    fn default() -> Self {
        Self {
            locking: LockingConfig::default(),
            coordinator: CoordinatorConfig::default(),
            cache: CacheConfig::default(),
            notifications: NotificationConfig::default(),
            observability: ObservabilityConfig::default(),
            database: None,
        }
    }
}

impl TaskerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (tasker.toml, .tasker-rc)
    /// 3. Environment variables (prefixed with TASKER_, nested with `__`)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`TaskerConfig::load`], resolving config files relative to `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&TaskerConfig::default())?);

        let toml_path = dir.join("tasker.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".tasker-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: TaskerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break lock exclusivity or disable updates
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.locking.ttl_seconds > 0,
            "locking.ttl_seconds must be greater than zero"
        );
        ensure!(
            self.coordinator.max_attempts > 0,
            "coordinator.max_attempts must be at least 1"
        );
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<TaskerConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = TaskerConfig::load_env_file();
        TaskerConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static TaskerConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config = TaskerConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.locking.ttl(), Duration::from_secs(30));
        assert_eq!(config.coordinator.max_attempts, 3);
        assert_eq!(config.cache.task_ttl_seconds, 3600);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("tasker.toml"),
            "[locking]\nttl_seconds = 10\n\n[coordinator]\nmax_attempts = 5\n",
        )
        .unwrap();

        let config = TaskerConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.locking.ttl_seconds, 10);
        assert_eq!(config.locking.key_prefix, "tasker:lock:");
        assert_eq!(config.coordinator.max_attempts, 5);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = TaskerConfig::default();
        config.notifications.emails_per_second = 2;
        config.save_to_file(dir.path().join("tasker.toml")).unwrap();

        let reloaded = TaskerConfig::load_from(dir.path()).unwrap();
        assert_eq!(reloaded.notifications.emails_per_second, 2);
    }

    #[test]
    fn test_zero_lock_ttl_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tasker.toml"), "[locking]\nttl_seconds = 0\n").unwrap();

        let err = TaskerConfig::load_from(dir.path()).unwrap_err();
        assert!(err.to_string().contains("ttl_seconds"));
    }
}
