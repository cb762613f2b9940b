use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Call state as reported by the platform telephony stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawCallState {
    Idle,
    Ringing,
    Offhook,
}

impl RawCallState {
    /// Map the platform's symbolic state name. Unknown symbols are treated
    /// as `Idle`.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.trim().to_ascii_uppercase().as_str() {
            "RINGING" => RawCallState::Ringing,
            "OFFHOOK" => RawCallState::Offhook,
            _ => RawCallState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawCallState::Idle => "IDLE",
            RawCallState::Ringing => "RINGING",
            RawCallState::Offhook => "OFFHOOK",
        }
    }
}

/// Telephony broadcasts, decoded once at the platform boundary
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonySignal {
    /// Phone state changed, with the incoming number when the platform
    /// exposes it
    PhoneStateChanged {
        state: RawCallState,
        incoming_number: Option<String>,
        sim_slot: Option<i32>,
    },
    /// A number was dialled; the state change follows separately
    NewOutgoingCall { number: String },
}

impl TelephonySignal {
    pub fn phone_state(
        symbol: &str,
        incoming_number: Option<String>,
        sim_slot: Option<i32>,
    ) -> Self {
        TelephonySignal::PhoneStateChanged {
            state: RawCallState::from_symbol(symbol),
            incoming_number,
            sim_slot,
        }
    }
}

/// Normalized `(state, number)` pair produced by the signal adapter
#[derive(Debug, Clone, PartialEq)]
pub struct CallTransition {
    pub raw_state: RawCallState,
    pub number: Option<String>,
    pub sim_slot: Option<i32>,
    pub received_at: Instant,
}

/// Call types as stored by the platform call log provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallLogType {
    Incoming,
    Outgoing,
    Missed,
    Voicemail,
    Rejected,
    Blocked,
    AnsweredExternally,
}

impl CallLogType {
    pub fn from_provider_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(CallLogType::Incoming),
            2 => Some(CallLogType::Outgoing),
            3 => Some(CallLogType::Missed),
            4 => Some(CallLogType::Voicemail),
            5 => Some(CallLogType::Rejected),
            6 => Some(CallLogType::Blocked),
            7 => Some(CallLogType::AnsweredExternally),
            _ => None,
        }
    }
}

/// One row of the call log provider. Columns are optional because the
/// provider does not guarantee any of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallLogRow {
    pub id: Option<i64>,
    pub number: Option<String>,
    /// Raw provider type code
    pub call_type: Option<i32>,
    /// Milliseconds since epoch
    pub date: Option<i64>,
    /// Seconds
    pub duration: Option<i64>,
    pub sim_slot: Option<i32>,
}

/// Returns the trimmed value, or `None` when it is blank.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Keeps only the last four digits so numbers can appear in logs.
pub fn redact_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_symbols() {
        assert_eq!(RawCallState::from_symbol("RINGING"), RawCallState::Ringing);
        assert_eq!(RawCallState::from_symbol("offhook"), RawCallState::Offhook);
        assert_eq!(RawCallState::from_symbol("IDLE"), RawCallState::Idle);
        assert_eq!(RawCallState::from_symbol("DIALING"), RawCallState::Idle);
        assert_eq!(RawCallState::from_symbol(""), RawCallState::Idle);
    }

    #[test]
    fn test_provider_codes() {
        assert_eq!(CallLogType::from_provider_code(1), Some(CallLogType::Incoming));
        assert_eq!(CallLogType::from_provider_code(3), Some(CallLogType::Missed));
        assert_eq!(CallLogType::from_provider_code(0), None);
        assert_eq!(CallLogType::from_provider_code(42), None);
    }

    #[test]
    fn test_redact_number() {
        assert_eq!(redact_number("+15551234567"), "***4567");
        assert_eq!(redact_number("911"), "***");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" 123 ")), Some("123".to_string()));
    }
}
