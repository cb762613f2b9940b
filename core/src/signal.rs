use crate::telephony::{CallTransition, RawCallState, TelephonySignal, non_blank};
use tokio::time::Instant;
use tracing::debug;

/// Turns raw telephony broadcasts into `CallTransition`s.
///
/// The platform announces a dialled number before the state change that
/// carries no number of its own, so the outgoing number is cached here and
/// attached to the following phone-state broadcasts.
#[derive(Debug, Default)]
pub struct SignalAdapter {
    outgoing_number: Option<String>,
}

impl SignalAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the normalized transition, or `None` for broadcasts that
    /// only update the adapter's cache.
    pub fn adapt(&mut self, signal: TelephonySignal, received_at: Instant) -> Option<CallTransition> {
        match signal {
            TelephonySignal::NewOutgoingCall { number } => {
                self.outgoing_number = non_blank(Some(number.as_str()));
                debug!("Cached outgoing number");
                None
            }
            TelephonySignal::PhoneStateChanged {
                state,
                incoming_number,
                sim_slot,
            } => {
                let incoming = non_blank(incoming_number.as_deref());
                let number = match state {
                    RawCallState::Ringing => incoming.or_else(|| self.outgoing_number.clone()),
                    _ => self.outgoing_number.clone().or(incoming),
                };

                if state == RawCallState::Idle {
                    self.outgoing_number = None;
                }

                Some(CallTransition {
                    raw_state: state,
                    number,
                    sim_slot,
                    received_at,
                })
            }
        }
    }
}
