use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed call log row: {0}")]
    MalformedRow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is not running")]
    NotRunning,
}

impl SyncError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SyncError::PermissionDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
