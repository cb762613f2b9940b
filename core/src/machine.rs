use crate::events::{CallDirection, CallEvent, CallEventState, now_millis};
use crate::telephony::{CallTransition, RawCallState, non_blank, redact_number};
use tracing::{debug, info};

/// The single "current call" register. The device handles one call at a
/// time, so this is reset in place rather than recreated.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSessionContext {
    pub last_state: RawCallState,
    pub is_incoming: bool,
    pub start_time_millis: Option<i64>,
    pub current_phone_number: Option<String>,
    pub sim_slot: Option<i32>,
    /// A RINGING transition was accepted for this call, even if its own
    /// emission was superseded by the debounce
    ringing_seen: bool,
    photo_requested: bool,
}

impl Default for CallSessionContext {
    fn default() -> Self {
        Self {
            last_state: RawCallState::Idle,
            is_incoming: false,
            start_time_millis: None,
            current_phone_number: None,
            sim_slot: None,
            ringing_seen: false,
            photo_requested: false,
        }
    }
}

impl CallSessionContext {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// An event decided by the state machine, still waiting for enrichment
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEmission {
    pub event: CallEvent,
    pub include_photo: bool,
}

/// Decides which lifecycle events a sequence of transitions produces.
///
/// `accept` records a transition and tells the caller to (re)arm the
/// debounce timer; `settle` runs when the timer fires and evaluates the
/// transition table against the last settled state.
#[derive(Debug)]
pub struct CallStateMachine {
    device_id: String,
    context: CallSessionContext,
    pending: Option<RawCallState>,
}

impl CallStateMachine {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            context: CallSessionContext::default(),
            pending: None,
        }
    }

    pub fn context(&self) -> &CallSessionContext {
        &self.context
    }

    pub fn pending(&self) -> Option<RawCallState> {
        self.pending
    }

    /// Latest accepted state, settled or not
    fn effective_state(&self) -> RawCallState {
        self.pending.unwrap_or(self.context.last_state)
    }

    /// Returns `true` when the transition changed the state and a new
    /// emission must be scheduled, replacing any pending one.
    pub fn accept(&mut self, transition: &CallTransition) -> bool {
        if let Some(number) = non_blank(transition.number.as_deref()) {
            self.context.current_phone_number = Some(number);
        }
        if transition.sim_slot.is_some() {
            self.context.sim_slot = transition.sim_slot;
        }

        let from = self.effective_state();
        let to = transition.raw_state;
        if from == to {
            debug!("Ignoring repeated {} transition", to.as_str());
            return false;
        }

        if from == RawCallState::Idle {
            self.context.start_time_millis = Some(now_millis());
        }
        if to == RawCallState::Ringing {
            self.context.ringing_seen = true;
        }

        if let Some(superseded) = self.pending.replace(to) {
            debug!(
                "{} superseded by {} before settling",
                superseded.as_str(),
                to.as_str()
            );
        }
        true
    }

    /// Evaluates the pending transition and commits it. Returns the event
    /// to emit, if any.
    pub fn settle(&mut self) -> Option<PlannedEmission> {
        let to = self.pending.take()?;
        let from = self.context.last_state;

        // A pending state equal to `from` means an intermediate transition
        // was superseded inside the debounce window
        let outcome = match (from, to) {
            (_, RawCallState::Ringing) => {
                self.context.is_incoming = true;
                Some(CallEventState::Ringing)
            }
            (RawCallState::Ringing, RawCallState::Offhook) => {
                self.context.is_incoming = true;
                Some(CallEventState::Offhook)
            }
            (RawCallState::Idle, RawCallState::Offhook) => {
                self.context.is_incoming = self.context.ringing_seen;
                Some(CallEventState::Offhook)
            }
            (RawCallState::Ringing, RawCallState::Idle) => {
                self.context.is_incoming = true;
                Some(CallEventState::Missed)
            }
            (RawCallState::Offhook, RawCallState::Idle) => Some(CallEventState::Idle),
            (RawCallState::Offhook, RawCallState::Offhook) => Some(CallEventState::Offhook),
            // A ringing call that ended inside the debounce window
            (RawCallState::Idle, RawCallState::Idle) if self.context.ringing_seen => {
                self.context.is_incoming = true;
                Some(CallEventState::Missed)
            }
            // Any other call that started and ended inside the window
            (RawCallState::Idle, RawCallState::Idle) if self.context.start_time_millis.is_some() => {
                Some(CallEventState::Idle)
            }
            _ => None,
        };

        self.context.last_state = to;

        let emission = outcome.map(|state| {
            let include_photo = state.wants_photo() && !self.context.photo_requested;
            if include_photo {
                self.context.photo_requested = true;
            }
            PlannedEmission {
                event: self.build_event(state),
                include_photo,
            }
        });

        if to == RawCallState::Idle {
            if let Some(started) = self.context.start_time_millis {
                info!(
                    "Call with {} ended after {}s",
                    self.context
                        .current_phone_number
                        .as_deref()
                        .map(redact_number)
                        .unwrap_or_else(|| "unknown".to_string()),
                    (now_millis() - started).max(0) / 1000
                );
            }
            self.context.reset();
        }

        emission
    }

    fn build_event(&self, state: CallEventState) -> CallEvent {
        let direction = if self.context.is_incoming {
            CallDirection::Incoming
        } else {
            CallDirection::Outgoing
        };

        CallEvent::new(
            self.device_id.clone(),
            direction,
            state,
            self.context.current_phone_number.as_deref(),
        )
        .with_sim_slot(self.context.sim_slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn transition(state: RawCallState, number: Option<&str>) -> CallTransition {
        CallTransition {
            raw_state: state,
            number: number.map(str::to_string),
            sim_slot: None,
            received_at: Instant::now(),
        }
    }

    /// Accept and immediately settle, as if the debounce elapsed
    fn step(machine: &mut CallStateMachine, state: RawCallState, number: Option<&str>) -> Option<PlannedEmission> {
        if machine.accept(&transition(state, number)) {
            machine.settle()
        } else {
            None
        }
    }

    fn summary(emission: Option<PlannedEmission>) -> Option<(CallDirection, CallEventState)> {
        emission.map(|e| (e.event.direction, e.event.state))
    }

    #[test]
    fn test_initial_state_is_idle() {
        let machine = CallStateMachine::new("dev");
        assert_eq!(machine.context().last_state, RawCallState::Idle);
        assert_eq!(machine.pending(), None);
    }

    #[test]
    fn test_incoming_answered_call() {
        let mut machine = CallStateMachine::new("dev");
        let n = Some("+15551234567");

        assert_eq!(
            summary(step(&mut machine, RawCallState::Ringing, n)),
            Some((CallDirection::Incoming, CallEventState::Ringing))
        );
        assert_eq!(
            summary(step(&mut machine, RawCallState::Offhook, None)),
            Some((CallDirection::Incoming, CallEventState::Offhook))
        );
        let idle = step(&mut machine, RawCallState::Idle, None).unwrap();
        assert_eq!(idle.event.direction, CallDirection::Incoming);
        assert_eq!(idle.event.state, CallEventState::Idle);
        assert_eq!(idle.event.number, "+15551234567");
    }

    #[test]
    fn test_outgoing_call() {
        let mut machine = CallStateMachine::new("dev");

        assert_eq!(
            summary(step(&mut machine, RawCallState::Offhook, Some("+15550001111"))),
            Some((CallDirection::Outgoing, CallEventState::Offhook))
        );
        assert_eq!(
            summary(step(&mut machine, RawCallState::Idle, None)),
            Some((CallDirection::Outgoing, CallEventState::Idle))
        );
    }

    #[test]
    fn test_missed_call() {
        let mut machine = CallStateMachine::new("dev");
        step(&mut machine, RawCallState::Ringing, Some("+15551234567"));

        let missed = step(&mut machine, RawCallState::Idle, None).unwrap();
        assert_eq!(missed.event.state, CallEventState::Missed);
        assert_eq!(missed.event.direction, CallDirection::Incoming);
        assert!(!missed.include_photo);
    }

    #[test]
    fn test_repeated_state_is_ignored_but_updates_number() {
        let mut machine = CallStateMachine::new("dev");
        assert!(machine.accept(&transition(RawCallState::Ringing, None)));
        assert!(!machine.accept(&transition(RawCallState::Ringing, Some("+15551234567"))));

        let emission = machine.settle().unwrap();
        assert_eq!(emission.event.number, "+15551234567");
        assert!(!machine.accept(&transition(RawCallState::Ringing, Some("+15559999999"))));
        assert!(machine.settle().is_none());
    }

    #[test]
    fn test_idle_resets_context() {
        let mut machine = CallStateMachine::new("dev");
        let slotted = CallTransition {
            sim_slot: Some(1),
            ..transition(RawCallState::Ringing, Some("+15551234567"))
        };
        machine.accept(&slotted);
        let ringing = machine.settle().unwrap();
        assert_eq!(ringing.event.sim_slot, Some(1));
        assert!(machine.context().start_time_millis.is_some());

        step(&mut machine, RawCallState::Idle, None);
        assert_eq!(machine.context(), &CallSessionContext::default());

        // Next call starts from a clean slate
        let next = step(&mut machine, RawCallState::Offhook, None).unwrap();
        assert_eq!(next.event.number, crate::events::UNKNOWN_NUMBER);
        assert_eq!(next.event.direction, CallDirection::Outgoing);
        assert_eq!(next.event.sim_slot, None);
    }

    #[test]
    fn test_superseded_ringing_still_counts_as_incoming() {
        let mut machine = CallStateMachine::new("dev");
        assert!(machine.accept(&transition(RawCallState::Ringing, Some("+15551234567"))));
        assert!(machine.accept(&transition(RawCallState::Offhook, None)));

        let emission = machine.settle().unwrap();
        assert_eq!(emission.event.state, CallEventState::Offhook);
        assert_eq!(emission.event.direction, CallDirection::Incoming);
        assert!(emission.include_photo);
    }

    #[test]
    fn test_ringing_ended_inside_window_is_missed() {
        let mut machine = CallStateMachine::new("dev");
        assert!(machine.accept(&transition(RawCallState::Ringing, Some("+15551234567"))));
        assert!(machine.accept(&transition(RawCallState::Idle, None)));

        let emission = machine.settle().unwrap();
        assert_eq!(emission.event.state, CallEventState::Missed);
        assert_eq!(emission.event.number, "+15551234567");
    }

    #[test]
    fn test_photo_requested_once_per_call() {
        let mut machine = CallStateMachine::new("dev");
        let n = Some("+15551234567");

        assert!(step(&mut machine, RawCallState::Ringing, n).unwrap().include_photo);
        assert!(!step(&mut machine, RawCallState::Offhook, None).unwrap().include_photo);
        assert!(!step(&mut machine, RawCallState::Idle, None).unwrap().include_photo);

        assert!(step(&mut machine, RawCallState::Offhook, n).unwrap().include_photo);
    }

    #[test]
    fn test_outgoing_call_ended_inside_window_emits_idle() {
        let mut machine = CallStateMachine::new("dev");
        assert!(machine.accept(&transition(RawCallState::Offhook, Some("+15550001111"))));
        assert!(machine.accept(&transition(RawCallState::Idle, None)));

        let emission = machine.settle().unwrap();
        assert_eq!(emission.event.state, CallEventState::Idle);
        assert_eq!(emission.event.direction, CallDirection::Outgoing);
        assert_eq!(emission.event.number, "+15550001111");
        assert!(!emission.include_photo);
        assert_eq!(machine.context(), &CallSessionContext::default());
    }

    #[test]
    fn test_idle_without_call_is_silent() {
        let mut machine = CallStateMachine::new("dev");
        assert!(machine.settle().is_none());
        assert!(!machine.accept(&transition(RawCallState::Idle, None)));
        assert!(machine.settle().is_none());
    }

    #[test]
    fn test_offhook_blip_reemits_offhook() {
        let mut machine = CallStateMachine::new("dev");
        step(&mut machine, RawCallState::Offhook, Some("+15550001111"));

        assert!(machine.accept(&transition(RawCallState::Idle, None)));
        assert!(machine.accept(&transition(RawCallState::Offhook, None)));

        let emission = machine.settle().unwrap();
        assert_eq!(emission.event.state, CallEventState::Offhook);
        assert_eq!(emission.event.direction, CallDirection::Outgoing);
        assert_eq!(emission.event.number, "+15550001111");
        assert!(!emission.include_photo);
    }
}
