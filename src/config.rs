//! Configuration management for NoteFS
//!
//! Layered lowest-first: struct defaults, optional TOML file, `NOTEFS_*`
//! environment variables. CLI flags are applied on top by `main`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file holding folders, notes, history and the FTS index
    pub database_path: PathBuf,

    /// Identity that scopes every row the mount can see
    pub owner: String,

    pub policy: NamePolicy,
    pub store: StoreSettings,
    pub mount: MountSettings,
}

/// Filename acceptance rules applied by the adapter
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct NamePolicy {
    /// Accept `create` of a file with no extension (stored with empty syntax)
    pub allow_extensionless: bool,

    /// Keep editor swap/backup files in memory instead of the database
    pub filter_editor_temp: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Attempts per transaction before surfacing TransientBusy
    pub max_retries: u32,

    /// Backoff before the first retry, doubled for each subsequent one
    pub retry_backoff_ms: u64,

    /// SQLite busy handler timeout per statement
    pub busy_timeout_ms: u64,

    /// Idle connections kept for reuse
    pub pool_size: usize,

    /// Largest note or scratch file, in bytes. Writes and truncates past it fail with EFBIG
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MountSettings {
    pub fsname: String,
    pub auto_unmount: bool,
    pub allow_other: bool,
    pub attr_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("notefs.db"),
            owner: String::new(),
            policy: NamePolicy::default(),
            store: StoreSettings::default(),
            mount: MountSettings::default(),
        }
    }
}

impl Default for NamePolicy {
    fn default() -> Self {
        Self {
            allow_extensionless: false,
            filter_editor_temp: true,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 10,
            busy_timeout_ms: 50,
            pool_size: 8,
            max_file_size: 64 * 1024 * 1024,
        }
    }
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            fsname: "notefs".to_string(),
            auto_unmount: true,
            allow_other: false,
            attr_ttl_secs: 1,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file with environment overrides.
    ///
    /// Environment keys use `__` between section and field, e.g.
    /// `NOTEFS_POLICY__ALLOW_EXTENSIONLESS=true`.
    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let file = match config_path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("notefs").required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("NOTEFS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.owner.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "owner (user id) cannot be empty".into(),
            ));
        }

        if self.store.pool_size == 0 {
            return Err(config::ConfigError::Message(
                "store.pool_size must be greater than 0".into(),
            ));
        }

        if self.store.max_file_size == 0 {
            return Err(config::ConfigError::Message(
                "store.max_file_size must be greater than 0".into(),
            ));
        }

        if self.store.max_retries == 0 {
            return Err(config::ConfigError::Message(
                "store.max_retries must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl StoreSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl MountSettings {
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_reject_extensionless() {
        let settings = Settings::default();
        assert!(!settings.policy.allow_extensionless);
        assert!(settings.policy.filter_editor_temp);
        assert_eq!(settings.store.max_retries, 5);
    }

    #[test]
    fn test_validate_requires_owner() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_err());
        settings.owner = "user-1".to_string();
        assert!(settings.validate().is_ok());
        settings.store.pool_size = 0;
        assert!(settings.validate().is_err());
        settings.store.pool_size = 8;
        settings.store.max_file_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let store = StoreSettings { retry_backoff_ms: 10, ..StoreSettings::default() };
        assert_eq!(store.backoff(1), Duration::from_millis(10));
        assert_eq!(store.backoff(2), Duration::from_millis(20));
        assert_eq!(store.backoff(4), Duration::from_millis(80));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notefs.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "owner = \"alice\"").unwrap();
        writeln!(file, "[policy]").unwrap();
        writeln!(file, "allow_extensionless = true").unwrap();
        writeln!(file, "[store]").unwrap();
        writeln!(file, "max_retries = 2").unwrap();
        drop(file);

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.owner, "alice");
        assert!(settings.policy.allow_extensionless);
        assert!(settings.policy.filter_editor_temp);
        assert_eq!(settings.store.max_retries, 2);
        assert_eq!(settings.store.pool_size, 8);
        assert_eq!(settings.store.max_file_size, 64 * 1024 * 1024);
        assert_eq!(settings.mount.fsname, "notefs");
    }
}
