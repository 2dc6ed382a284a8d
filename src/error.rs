use std::fmt;
use std::io;
use std::path::PathBuf;

/// How an upload failed, classified from the storage service's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    Auth,
    Quota,
    Transient,
    Rejected,
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadErrorKind::Auth => write!(f, "authentication"),
            UploadErrorKind::Quota => write!(f, "quota"),
            UploadErrorKind::Transient => write!(f, "transient"),
            UploadErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug)]
pub enum BackupError {
    Config(String),
    LockBusy(PathBuf),
    Dump(String),
    Compression(String),
    SizeRejected { size: u64, minimum: u64 },
    Upload { kind: UploadErrorKind, message: String },
    Notification(String),
    Store(String),
    Io(io::Error),
    Serialization(String),
}

impl BackupError {
    pub fn upload(kind: UploadErrorKind, message: impl Into<String>) -> Self {
        BackupError::Upload {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BackupError::LockBusy(path) => {
                write!(f, "Another backup run holds the lock at {}", path.display())
            }
            BackupError::Dump(msg) => write!(f, "Dump error: {}", msg),
            BackupError::Compression(msg) => write!(f, "Compression error: {}", msg),
            BackupError::SizeRejected { size, minimum } => write!(
                f,
                "Archive rejected: {} bytes is below the {} byte minimum",
                size, minimum
            ),
            BackupError::Upload { kind, message } => {
                write!(f, "Upload error ({}): {}", kind, message)
            }
            BackupError::Notification(msg) => write!(f, "Notification error: {}", msg),
            BackupError::Store(msg) => write!(f, "Run log error: {}", msg),
            BackupError::Io(err) => write!(f, "IO error: {}", err),
            BackupError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BackupError {
    fn from(err: io::Error) -> Self {
        BackupError::Io(err)
    }
}

impl From<toml::de::Error> for BackupError {
    fn from(err: toml::de::Error) -> Self {
        BackupError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        BackupError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        BackupError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for BackupError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            UploadErrorKind::Transient
        } else if err.status().map(|s| s.as_u16()) == Some(401) {
            UploadErrorKind::Auth
        } else {
            UploadErrorKind::Rejected
        };
        BackupError::upload(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
