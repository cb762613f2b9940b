use crate::telephony::RawCallState;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const HISTORY_LEN: usize = 2;

type DedupKey = (RawCallState, Option<String>);

/// Drops a `(state, number)` pair seen again within the window. Two
/// receivers can forward the same platform broadcast, and the platform
/// itself replays some of them.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    recent: VecDeque<(DedupKey, Instant)>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    /// Returns `true` when the pair should be processed. Accepted pairs are
    /// remembered; rejected ones do not extend the window.
    pub fn accept(&mut self, state: RawCallState, number: Option<&str>, now: Instant) -> bool {
        let key = (state, number.map(str::to_string));

        let duplicate = self.recent.iter().any(|(seen, at)| {
            *seen == key && now.saturating_duration_since(*at) < self.window
        });
        if duplicate {
            return false;
        }

        self.recent.retain(|(seen, _)| *seen != key);
        if self.recent.len() == HISTORY_LEN {
            self.recent.pop_front();
        }
        self.recent.push_back((key, now));
        true
    }
}
