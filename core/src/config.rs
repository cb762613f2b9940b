use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_DEDUP_WINDOW_MS: u64 = 300;
const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_CALL_LOG_SETTLE_MS: u64 = 1000;
const DEFAULT_CALL_LOG_LOOKBACK_MS: u64 = 24 * 60 * 60 * 1000;

/// Tunables for the call sync engine. Persisted as JSON next to the host's
/// other settings; every field falls back to its default when missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Identifier stamped on every outgoing event
    pub device_id: String,
    /// Identical transitions closer together than this are dropped
    pub dedup_window_ms: u64,
    /// Delay before a state change is turned into an event
    pub debounce_ms: u64,
    /// Quiet period after a call-log change before reconciling
    pub call_log_settle_ms: u64,
    /// How far back the first reconciliation reaches
    pub call_log_lookback_ms: u64,
    pub attach_photos: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            call_log_settle_ms: DEFAULT_CALL_LOG_SETTLE_MS,
            call_log_lookback_ms: DEFAULT_CALL_LOG_LOOKBACK_MS,
            attach_photos: true,
        }
    }
}

impl SyncConfig {
    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_json(&data)?;
        info!("Loaded call sync config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device_id is empty".to_string()));
        }
        if self.dedup_window_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "dedup_window_ms must be positive".to_string(),
            ));
        }
        if self.debounce_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "debounce_ms must be positive".to_string(),
            ));
        }
        if self.call_log_settle_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "call_log_settle_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn call_log_settle(&self) -> Duration {
        Duration::from_millis(self.call_log_settle_ms)
    }
}
