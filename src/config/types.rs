use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

/// Which `pg_dump` output format to produce.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Textual SQL statements.
    Plain,
    /// pg_dump's custom archive format, restorable with pg_restore.
    #[default]
    Native,
}

impl DumpFormat {
    pub fn entry_extension(&self) -> &'static str {
        match self {
            DumpFormat::Plain => "sql",
            DumpFormat::Native => "dump",
        }
    }
}

impl std::fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpFormat::Plain => write!(f, "plain"),
            DumpFormat::Native => write!(f, "native"),
        }
    }
}

impl FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(DumpFormat::Plain),
            "native" | "custom" => Ok(DumpFormat::Native),
            other => Err(format!("unknown dump format '{}', expected plain or native", other)),
        }
    }
}

/// Per-server storage credentials. Unset fields fall back to [`StorageDefaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageOverride {
    pub key_id: Option<String>,
    pub app_key: Option<String>,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageDefaults {
    pub key_id: Option<String>,
    pub app_key: Option<String>,
    pub bucket: Option<String>,
}

/// Fully resolved upload destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    pub key_id: String,
    pub app_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckUrls {
    pub start: Option<String>,
    pub success: Option<String>,
    pub fail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub connection_string: String,
    pub frequency_hrs: u32,
    #[serde(default)]
    pub archive_name: String,
    #[serde(default)]
    pub archive_password: Option<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    #[serde(default)]
    pub storage: StorageOverride,
    #[serde(default)]
    pub health_check: HealthCheckUrls,
}

impl ServerConfig {
    #[cfg(test)]
    pub fn new(id: &str, connection_string: &str, frequency_hrs: u32) -> Self {
        Self {
            id: id.to_string(),
            connection_string: connection_string.to_string(),
            frequency_hrs,
            archive_name: String::new(),
            archive_password: None,
            storage: StorageOverride::default(),
            health_check: HealthCheckUrls::default(),
            exclude_tables: Vec::new(),
        }
    }

    /// Server override first, global default second, field by field.
    pub fn resolve_storage(&self, defaults: &StorageDefaults) -> Result<StorageTarget> {
        let pick = |own: &Option<String>, global: &Option<String>, field: &str| {
            non_empty(own)
                .or_else(|| non_empty(global))
                .map(str::to_string)
                .ok_or_else(|| {
                    BackupError::Config(format!(
                        "no storage {} configured for server '{}' and no global default",
                        field, self.id
                    ))
                })
        };

        Ok(StorageTarget {
            key_id: pick(&self.storage.key_id, &defaults.key_id, "key_id")?,
            app_key: pick(&self.storage.app_key, &defaults.app_key, "app_key")?,
            bucket: pick(&self.storage.bucket, &defaults.bucket, "bucket")?,
        })
    }

    pub fn resolve_passphrase<'a>(&'a self, default: &'a Option<String>) -> Option<&'a str> {
        non_empty(&self.archive_password).or_else(|| non_empty(default))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// External tool locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    pub pg_dump: PathBuf,
    pub seven_zip: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pg_dump: PathBuf::from("pg_dump"),
            seven_zip: PathBuf::from("7z"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub pipeline_secs: Option<u64>,
    #[serde(default)]
    pub upload_secs: Option<u64>,
    #[serde(default = "default_notify_secs")]
    pub notify_secs: u64,
}

fn default_notify_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pipeline_secs: None,
            upload_secs: None,
            notify_secs: default_notify_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub default_archive_password: Option<String>,
    #[serde(default)]
    pub default_format: DumpFormat,
    #[serde(default = "super::history_path")]
    pub history_path: PathBuf,
    #[serde(default = "super::lock_path")]
    pub lock_path: PathBuf,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub storage: StorageDefaults,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_archive_password: None,
            default_format: DumpFormat::default(),
            history_path: super::history_path(),
            lock_path: super::lock_path(),
            work_dir: None,
            storage: StorageDefaults::default(),
            tools: ToolsConfig::default(),
            timeouts: TimeoutConfig::default(),
            servers: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(BackupError::Config("server with empty id".to_string()));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(BackupError::Config(format!(
                    "duplicate server id '{}'",
                    server.id
                )));
            }
            if server.connection_string.trim().is_empty() {
                return Err(BackupError::Config(format!(
                    "server '{}' has no connection_string",
                    server.id
                )));
            }
            if server.frequency_hrs == 0 {
                return Err(BackupError::Config(format!(
                    "server '{}' must have frequency_hrs > 0",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Environment values replace the file's global defaults.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());
        if let Some(v) = lookup("B2_KEY_ID") {
            self.storage.key_id = Some(v);
        }
        if let Some(v) = lookup("B2_APP_KEY") {
            self.storage.app_key = Some(v);
        }
        if let Some(v) = lookup("B2_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = lookup("ARCHIVE_PASSWORD") {
            self.default_archive_password = Some(v);
        }
    }
}
