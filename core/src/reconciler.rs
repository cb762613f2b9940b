use crate::enrichment::ContactEnricher;
use crate::error::{Result, SyncError};
use crate::events::{CallDirection, CallEvent, CallEventState, CallHistoryBatch};
use crate::telephony::{CallLogRow, CallLogType};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read access to the platform call log
pub trait CallLogSource: Send + Sync {
    /// All rows with `date >= since_millis`, most recent first.
    /// `SyncError::PermissionDenied` signals a revoked permission.
    fn query_since(&self, since_millis: i64) -> Result<Vec<CallLogRow>>;
}

/// Source used when the host provides no call log access
pub struct NoCallLog;

impl CallLogSource for NoCallLog {
    fn query_since(&self, _since_millis: i64) -> Result<Vec<CallLogRow>> {
        Ok(Vec::new())
    }
}

/// Rebuilds call events from the call log to fill gaps left by the
/// real-time path and to supply final durations.
#[derive(Clone)]
pub struct HistoricalReconciler {
    source: Arc<dyn CallLogSource>,
    enricher: ContactEnricher,
    device_id: String,
}

impl HistoricalReconciler {
    pub fn new(
        source: Arc<dyn CallLogSource>,
        enricher: ContactEnricher,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            enricher,
            device_id: device_id.into(),
        }
    }

    /// Blocking. An empty batch means "nothing usable right now", not
    /// "no calls happened": a failed query keeps the checkpoint at `since`.
    pub fn reconcile(&self, since: i64) -> CallHistoryBatch {
        let rows = match self.source.query_since(since) {
            Ok(rows) => rows,
            Err(e) if e.is_permission_denied() => {
                warn!("Call log permission revoked, aborting reconciliation: {}", e);
                return CallHistoryBatch {
                    events: Vec::new(),
                    last_sync_timestamp: since,
                };
            }
            Err(e) => {
                warn!("Call log query failed: {}", e);
                return CallHistoryBatch {
                    events: Vec::new(),
                    last_sync_timestamp: since,
                };
            }
        };

        let total = rows.len();
        let mut events = Vec::with_capacity(total);
        for row in rows {
            match self.parse_row(&row) {
                Ok(event) if event.timestamp < since => {
                    debug!("Skipping call log row {:?} older than checkpoint", row.id);
                }
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping call log row {:?}: {}", row.id, e),
            }
        }

        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let last_sync_timestamp = events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(since)
            .max(since);

        info!(
            "Reconciled {} of {} call log rows since {}",
            events.len(),
            total,
            since
        );

        CallHistoryBatch {
            events,
            last_sync_timestamp,
        }
    }

    fn parse_row(&self, row: &CallLogRow) -> Result<CallEvent> {
        let id = row
            .id
            .ok_or_else(|| SyncError::MalformedRow("missing id".to_string()))?;
        let code = row
            .call_type
            .ok_or_else(|| SyncError::MalformedRow("missing type".to_string()))?;
        let call_type = CallLogType::from_provider_code(code)
            .ok_or_else(|| SyncError::MalformedRow(format!("unknown type {}", code)))?;
        let date = row
            .date
            .filter(|d| *d > 0)
            .ok_or_else(|| SyncError::MalformedRow("missing date".to_string()))?;
        let duration = row.duration.unwrap_or(0);
        if duration < 0 {
            return Err(SyncError::MalformedRow(format!(
                "negative duration {}",
                duration
            )));
        }

        let (direction, state) = classify(call_type);
        let event = CallEvent::new(self.device_id.clone(), direction, state, row.number.as_deref())
            .at(date)
            .with_sim_slot(row.sim_slot)
            .with_call_log(id, duration);

        Ok(self.enricher.enrich(event, false))
    }
}

fn classify(call_type: CallLogType) -> (CallDirection, CallEventState) {
    match call_type {
        CallLogType::Outgoing => (CallDirection::Outgoing, CallEventState::Idle),
        CallLogType::Incoming | CallLogType::AnsweredExternally => {
            (CallDirection::Incoming, CallEventState::Idle)
        }
        CallLogType::Missed
        | CallLogType::Rejected
        | CallLogType::Blocked
        | CallLogType::Voicemail => (CallDirection::Incoming, CallEventState::Missed),
    }
}
