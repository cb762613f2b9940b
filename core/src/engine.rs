use crate::config::SyncConfig;
use crate::dedup::Deduplicator;
use crate::dispatcher::{EventDispatcher, PeerLink};
use crate::enrichment::{ContactDirectory, ContactEnricher};
use crate::error::{Result, SyncError};
use crate::events::{CallEvent, WireMessage, now_millis};
use crate::machine::CallStateMachine;
use crate::reconciler::{CallLogSource, HistoricalReconciler};
use crate::signal::SignalAdapter;
use crate::sync::CallLogSync;
use crate::telephony::TelephonySignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 100;

enum Command {
    Signal {
        signal: TelephonySignal,
        received_at: Instant,
    },
    Shutdown,
}

/// Entry point for the host: feeds telephony broadcasts into a single
/// worker task that owns all call state, and drives call-log
/// reconciliation alongside it.
pub struct CallSyncEngine {
    config: SyncConfig,
    command_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<CallEvent>,
    call_log: CallLogSync,
}

impl CallSyncEngine {
    /// Spawns the engine's tasks. Must be called from within a Tokio
    /// runtime.
    pub fn start(
        config: SyncConfig,
        link: Arc<dyn PeerLink>,
        contacts: Arc<dyn ContactDirectory>,
        call_log: Arc<dyn CallLogSource>,
    ) -> Result<Self> {
        config.validate()?;

        let dispatcher = EventDispatcher::new(link);
        let enricher = ContactEnricher::new(contacts, config.attach_photos);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let worker = CallWorker {
            adapter: SignalAdapter::new(),
            dedup: Deduplicator::new(config.dedup_window()),
            machine: CallStateMachine::new(config.device_id.clone()),
            enricher: enricher.clone(),
            dispatcher: dispatcher.clone(),
            event_tx: event_tx.clone(),
            debounce: config.debounce_delay(),
            deadline: None,
        };
        tokio::spawn(worker.run(command_rx));

        let reconciler = HistoricalReconciler::new(call_log, enricher, config.device_id.clone());
        let initial_checkpoint = now_millis() - config.call_log_lookback_ms as i64;
        let call_log = CallLogSync::start(
            reconciler,
            dispatcher,
            config.call_log_settle(),
            initial_checkpoint,
        );

        info!("Call sync engine started for device {}", config.device_id);

        Ok(Self {
            config,
            command_tx,
            event_tx,
            call_log,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Queue a telephony broadcast. Never blocks.
    pub fn submit(&self, signal: TelephonySignal) -> Result<()> {
        self.command_tx
            .send(Command::Signal {
                signal,
                received_at: Instant::now(),
            })
            .map_err(|_| SyncError::NotRunning)
    }

    /// Events emitted by the real-time path, after enrichment
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn call_log(&self) -> &CallLogSync {
        &self.call_log
    }

    /// Stops the worker and call-log change handling. A pending debounced
    /// emission is discarded.
    pub fn shutdown(&self) {
        if self.command_tx.send(Command::Shutdown).is_ok() {
            info!("Call sync engine shutting down");
        }
        self.call_log.shutdown();
    }
}

/// Owns every mutable call register; all transitions are evaluated here,
/// one at a time.
struct CallWorker {
    adapter: SignalAdapter,
    dedup: Deduplicator,
    machine: CallStateMachine,
    enricher: ContactEnricher,
    dispatcher: EventDispatcher,
    event_tx: broadcast::Sender<CallEvent>,
    debounce: Duration,
    deadline: Option<Instant>,
}

impl CallWorker {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let armed = self.deadline.is_some();
            let wake_at = self.deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(Command::Signal { signal, received_at }) => {
                        self.handle_signal(signal, received_at);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = sleep_until(wake_at), if armed => {
                    self.deadline = None;
                    self.emit();
                }
            }
        }
        debug!("Call state worker stopped");
    }

    fn handle_signal(&mut self, signal: TelephonySignal, received_at: Instant) {
        let Some(transition) = self.adapter.adapt(signal, received_at) else {
            return;
        };

        if !self.dedup.accept(
            transition.raw_state,
            transition.number.as_deref(),
            transition.received_at,
        ) {
            debug!("Dropping duplicate {} broadcast", transition.raw_state.as_str());
            return;
        }

        if self.machine.accept(&transition) {
            // Replaces any emission still waiting on the previous transition
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    fn emit(&mut self) {
        let Some(planned) = self.machine.settle() else {
            return;
        };

        let event = self.enricher.enrich(planned.event, planned.include_photo);
        debug!(
            "Emitting {:?} {:?} call event {}",
            event.direction, event.state, event.event_id
        );

        let _ = self.event_tx.send(event.clone());
        self.dispatcher.dispatch(WireMessage::CallEvent(event));
    }
}
