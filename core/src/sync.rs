use crate::dispatcher::EventDispatcher;
use crate::events::{CallEvent, CallHistoryBatch, WireMessage};
use crate::reconciler::HistoricalReconciler;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Resume point for call-log queries. Queries are inclusive of `millis`, so
/// the rows already delivered at exactly that instant are remembered and
/// filtered out of the next batch.
#[derive(Debug, Default)]
struct Checkpoint {
    millis: i64,
    boundary_ids: HashSet<i64>,
}

impl Checkpoint {
    fn new(millis: i64) -> Self {
        Self {
            millis,
            boundary_ids: HashSet::new(),
        }
    }

    fn already_delivered(&self, event: &CallEvent) -> bool {
        event.timestamp == self.millis
            && event
                .call_log_id
                .is_some_and(|id| self.boundary_ids.contains(&id))
    }

    fn advance(&mut self, to: i64, delivered: &[CallEvent]) {
        if to > self.millis {
            self.millis = to;
            self.boundary_ids.clear();
        }
        let millis = self.millis;
        self.boundary_ids.extend(
            delivered
                .iter()
                .filter(|e| e.timestamp == millis)
                .filter_map(|e| e.call_log_id),
        );
    }
}

struct Inner {
    reconciler: HistoricalReconciler,
    dispatcher: EventDispatcher,
    checkpoint: Mutex<Checkpoint>,
    // Serializes reconciliation passes so checkpoints advance monotonically
    running: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn sync_now(&self) -> CallHistoryBatch {
        let _guard = self.running.lock().await;
        let since = self.checkpoint.lock().millis;

        let reconciler = self.reconciler.clone();
        let mut batch = match tokio::task::spawn_blocking(move || reconciler.reconcile(since)).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Call log reconciliation task failed: {}", e);
                return CallHistoryBatch {
                    events: Vec::new(),
                    last_sync_timestamp: since,
                };
            }
        };

        {
            let checkpoint = self.checkpoint.lock();
            batch.events.retain(|e| !checkpoint.already_delivered(e));
        }

        if batch.is_empty() {
            debug!("No call log entries to sync since {}", since);
            return batch;
        }

        let delivered = self
            .dispatcher
            .deliver(WireMessage::CallHistory(batch.clone()))
            .await;

        if delivered {
            let mut checkpoint = self.checkpoint.lock();
            checkpoint.advance(batch.last_sync_timestamp, &batch.events);
            info!(
                "Synced {} call log entries, checkpoint now {}",
                batch.events.len(),
                checkpoint.millis
            );
        } else {
            debug!("Call history not delivered, checkpoint stays at {}", since);
        }

        batch
    }
}

/// Drives the historical reconciler from call-log change notifications and
/// owns the resume checkpoint.
pub struct CallLogSync {
    inner: Arc<Inner>,
    tick_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl CallLogSync {
    /// Spawns the change-coalescing task. Must be called from within a
    /// Tokio runtime.
    pub fn start(
        reconciler: HistoricalReconciler,
        dispatcher: EventDispatcher,
        settle: Duration,
        initial_checkpoint: i64,
    ) -> Self {
        let inner = Arc::new(Inner {
            reconciler,
            dispatcher,
            checkpoint: Mutex::new(Checkpoint::new(initial_checkpoint)),
            running: tokio::sync::Mutex::new(()),
        });
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_ticks(inner.clone(), tick_rx, settle));
        Self {
            inner,
            tick_tx: Mutex::new(Some(tick_tx)),
        }
    }

    /// Called by the host's call-log content observer. Bursts of changes
    /// are coalesced into a single reconciliation.
    pub fn notify_changed(&self) {
        let sent = self
            .tick_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(()).is_ok());
        if !sent {
            debug!("Call log sync stopped, ignoring change notification");
        }
    }

    pub fn checkpoint(&self) -> i64 {
        self.inner.checkpoint.lock().millis
    }

    pub fn set_checkpoint(&self, checkpoint: i64) {
        *self.inner.checkpoint.lock() = Checkpoint::new(checkpoint);
    }

    /// Reconciles from the current checkpoint and pushes the batch. The
    /// checkpoint only moves once the peer link took the batch.
    pub async fn sync_now(&self) -> CallHistoryBatch {
        self.inner.sync_now().await
    }

    /// Stops reacting to change notifications. A coalesced sync that has not
    /// started yet is dropped; explicit `sync_now` calls still work.
    pub fn shutdown(&self) {
        if self.tick_tx.lock().take().is_some() {
            info!("Call log sync shutting down");
        }
    }
}

async fn run_ticks(inner: Arc<Inner>, mut tick_rx: mpsc::UnboundedReceiver<()>, settle: Duration) {
    while tick_rx.recv().await.is_some() {
        let mut deadline = Instant::now() + settle;
        loop {
            tokio::select! {
                tick = tick_rx.recv() => match tick {
                    Some(()) => deadline = Instant::now() + settle,
                    None => return,
                },
                _ = sleep_until(deadline) => break,
            }
        }
        inner.sync_now().await;
    }
    debug!("Call log sync task stopped");
}
