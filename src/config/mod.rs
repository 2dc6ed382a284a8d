mod types;

pub use types::*;

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".pgbak"))
        .unwrap_or_else(|| PathBuf::from(".pgbak"))
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn history_path() -> PathBuf {
    config_dir().join("history.sqlite")
}

pub fn lock_path() -> PathBuf {
    config_dir().join("pgbak.lock")
}

/// Loads the file, applies environment overrides and validates the result.
pub fn load(path: &Path) -> Result<AppConfig> {
    let mut config = load_from(path)?;
    config.apply_env(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

pub fn load_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        debug!("Config file not found at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }

    info!("Loading configuration from {:?}", path);
    let contents = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;
    use tempfile::tempdir;

    fn server(id: &str) -> ServerConfig {
        ServerConfig::new(id, "postgresql://backup@db.internal/app", 24)
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut primary = server("primary");
        primary.archive_name = "primary_{timestamp}".to_string();
        primary.storage.bucket = Some("primary-bucket".to_string());
        primary.health_check.success = Some("https://hc.example/ok".to_string());
        primary.exclude_tables = vec!["audit_events".to_string()];

        let config = AppConfig {
            servers: vec![primary, server("replica")],
            storage: StorageDefaults {
                key_id: Some("key".to_string()),
                app_key: Some("secret".to_string()),
                bucket: Some("default-bucket".to_string()),
            },
            default_format: DumpFormat::Plain,
            history_path: dir.path().join("history.sqlite"),
            lock_path: dir.path().join("pgbak.lock"),
            ..AppConfig::default()
        };

        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = load_from(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [[servers]]
            id = "app"
            connection_string = "postgresql://localhost/app"
            frequency_hrs = 6
            "#,
        )
        .unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.default_format, DumpFormat::Native);
        assert_eq!(loaded.tools.seven_zip, PathBuf::from("7z"));
        assert_eq!(loaded.timeouts.notify_secs, 10);
        assert!(loaded.servers[0].health_check.start.is_none());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let config = AppConfig {
            servers: vec![server("app"), server("app")],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_frequency() {
        let config = AppConfig {
            servers: vec![ServerConfig::new("app", "postgresql://localhost/app", 0)],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));
    }

    #[test]
    fn test_storage_override_wins_per_field() {
        let mut app = server("app");
        app.storage.bucket = Some("app-bucket".to_string());
        app.storage.key_id = Some("  ".to_string());
        let defaults = StorageDefaults {
            key_id: Some("global-key".to_string()),
            app_key: Some("global-secret".to_string()),
            bucket: Some("global-bucket".to_string()),
        };

        let target = app.resolve_storage(&defaults).unwrap();
        assert_eq!(target.bucket, "app-bucket");
        assert_eq!(target.key_id, "global-key");
        assert_eq!(target.app_key, "global-secret");
    }

    #[test]
    fn test_missing_storage_is_config_error() {
        let defaults = StorageDefaults {
            key_id: Some("global-key".to_string()),
            ..StorageDefaults::default()
        };
        let err = server("app").resolve_storage(&defaults).unwrap_err();
        assert!(matches!(err, BackupError::Config(ref m) if m.contains("app_key")));
    }

    #[test]
    fn test_env_overrides_global_defaults() {
        let mut config = AppConfig::default();
        config.storage.bucket = Some("from-file".to_string());
        config.apply_env(|name| match name {
            "B2_BUCKET" => Some("from-env".to_string()),
            "ARCHIVE_PASSWORD" => Some("hunter2".to_string()),
            "B2_KEY_ID" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.storage.bucket.as_deref(), Some("from-env"));
        assert_eq!(config.default_archive_password.as_deref(), Some("hunter2"));
        assert!(config.storage.key_id.is_none());
    }

    #[test]
    fn test_passphrase_falls_back_to_default() {
        let default = Some("global".to_string());
        let mut app = server("app");
        assert_eq!(app.resolve_passphrase(&default), Some("global"));
        app.archive_password = Some("own".to_string());
        assert_eq!(app.resolve_passphrase(&default), Some("own"));
        assert_eq!(server("x").resolve_passphrase(&None), None);
    }

    #[test]
    fn test_dump_format_parse() {
        assert_eq!("plain".parse::<DumpFormat>().unwrap(), DumpFormat::Plain);
        assert_eq!("Native".parse::<DumpFormat>().unwrap(), DumpFormat::Native);
        assert!("tar".parse::<DumpFormat>().is_err());
    }
}
