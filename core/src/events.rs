use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Display value used when no number was ever observed for a call
pub const UNKNOWN_NUMBER: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEventState {
    Ringing,
    Offhook,
    Idle,
    Missed,
}

impl CallEventState {
    /// Photos are only worth sending while the call is live
    pub fn wants_photo(&self) -> bool {
        matches!(self, CallEventState::Ringing | CallEventState::Offhook)
    }
}

/// A call lifecycle event as delivered to the desktop peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub event_id: uuid::Uuid,
    pub device_id: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub direction: CallDirection,
    pub state: CallEventState,
    /// Display form of the number, `"Unknown"` when absent
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    /// Base64 encoded thumbnail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_slot: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_log_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
}

impl CallEvent {
    pub fn new(
        device_id: impl Into<String>,
        direction: CallDirection,
        state: CallEventState,
        number: Option<&str>,
    ) -> Self {
        let number = number
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_NUMBER)
            .to_string();

        Self {
            event_id: uuid::Uuid::new_v4(),
            device_id: device_id.into(),
            timestamp: now_millis(),
            direction,
            state,
            number,
            normalized_number: None,
            contact_name: None,
            contact_photo: None,
            sim_slot: None,
            call_log_id: None,
            duration_sec: None,
        }
    }

    pub fn has_known_number(&self) -> bool {
        self.number != UNKNOWN_NUMBER
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Only E.164-like values (leading `+`) are kept.
    pub fn with_normalized_number(mut self, normalized: Option<String>) -> Self {
        self.normalized_number = normalized
            .map(|n| n.trim().to_string())
            .filter(|n| n.len() > 1 && n.starts_with('+'));
        self
    }

    /// A name equal to the raw number means the lookup found nothing.
    pub fn with_contact_name(mut self, name: Option<String>) -> Self {
        self.contact_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty() && *n != self.number);
        self
    }

    pub fn with_contact_photo(mut self, photo: Option<String>) -> Self {
        self.contact_photo = photo.filter(|p| !p.is_empty());
        self
    }

    pub fn with_sim_slot(mut self, sim_slot: Option<i32>) -> Self {
        self.sim_slot = sim_slot;
        self
    }

    pub fn with_call_log(mut self, call_log_id: i64, duration_sec: i64) -> Self {
        self.call_log_id = Some(call_log_id);
        self.duration_sec = Some(duration_sec);
        self
    }
}

/// A reconciliation result: events plus the checkpoint to resume from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryBatch {
    pub events: Vec<CallEvent>,
    pub last_sync_timestamp: i64,
}

impl CallHistoryBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// One-directional push envelope sent to the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireMessage {
    CallEvent(CallEvent),
    CallHistory(CallHistoryBatch),
}

impl WireMessage {
    pub fn to_payload(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::CallEvent(_) => "call_event",
            WireMessage::CallHistory(_) => "call_history",
        }
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
