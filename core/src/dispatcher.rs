use crate::events::WireMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connection to the paired desktop peer. Implemented by the host on top of
/// its encrypted transport.
pub trait PeerLink: Send + Sync {
    fn is_connected(&self) -> bool;
    /// Single-shot send; the result is informational only
    fn send_message(&self, payload: String) -> bool;
}

/// Pushes wire messages to the peer. Messages produced while the peer is
/// unreachable are dropped, never queued.
///
/// Dispatched messages go through one sender task and reach the link in the
/// order they were dispatched.
#[derive(Clone)]
pub struct EventDispatcher {
    link: Arc<dyn PeerLink>,
    queue_tx: mpsc::UnboundedSender<WireMessage>,
}

impl EventDispatcher {
    /// Spawns the sender task. Must be called from within a Tokio runtime.
    pub fn new(link: Arc<dyn PeerLink>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_sender(link.clone(), queue_rx));
        Self { link, queue_tx }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Fire-and-forget delivery. Never blocks the caller.
    pub fn dispatch(&self, message: WireMessage) {
        if let Err(e) = self.queue_tx.send(message) {
            debug!("Dispatcher stopped, dropping {}", e.0.kind());
        }
    }

    /// Serializes and sends `message`, returning whether the link accepted
    /// it. Never retries.
    pub async fn deliver(&self, message: WireMessage) -> bool {
        send_to_link(&self.link, message).await
    }
}

async fn run_sender(link: Arc<dyn PeerLink>, mut queue_rx: mpsc::UnboundedReceiver<WireMessage>) {
    while let Some(message) = queue_rx.recv().await {
        send_to_link(&link, message).await;
    }
    debug!("Dispatcher sender task stopped");
}

async fn send_to_link(link: &Arc<dyn PeerLink>, message: WireMessage) -> bool {
    let kind = message.kind();

    if !link.is_connected() {
        debug!("Peer not connected, dropping {}", kind);
        return false;
    }

    let payload = match message.to_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize {}: {}", kind, e);
            return false;
        }
    };

    let link = link.clone();
    match tokio::task::spawn_blocking(move || link.send_message(payload)).await {
        Ok(true) => {
            info!("Sent {} to peer", kind);
            true
        }
        Ok(false) => {
            warn!("Peer link rejected {}", kind);
            false
        }
        Err(e) => {
            warn!("Send task for {} failed: {}", kind, e);
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{CallDirection, CallEvent, CallEventState};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Link that records every payload it is asked to send
    pub(crate) struct RecordingLink {
        pub connected: AtomicBool,
        pub accept: AtomicBool,
        pub sends: AtomicUsize,
        pub payloads: Mutex<Vec<String>>,
    }

    impl RecordingLink {
        pub(crate) fn new(connected: bool) -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(connected),
                accept: AtomicBool::new(true),
                sends: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn messages(&self) -> Vec<serde_json::Value> {
            self.payloads
                .lock()
                .iter()
                .map(|p| serde_json::from_str(p).unwrap())
                .collect()
        }
    }

    impl PeerLink for RecordingLink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send_message(&self, payload: String) -> bool {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().push(payload);
            self.accept.load(Ordering::SeqCst)
        }
    }

    /// Blocks inside `send_message` for payloads containing `marker`
    struct SlowLink {
        inner: Arc<RecordingLink>,
        marker: &'static str,
        delay: Duration,
    }

    impl PeerLink for SlowLink {
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn send_message(&self, payload: String) -> bool {
            if payload.contains(self.marker) {
                std::thread::sleep(self.delay);
            }
            self.inner.send_message(payload)
        }
    }

    fn event(state: CallEventState) -> WireMessage {
        WireMessage::CallEvent(CallEvent::new(
            "dev",
            CallDirection::Incoming,
            state,
            Some("+15551234567"),
        ))
    }

    fn sample() -> WireMessage {
        event(CallEventState::Ringing)
    }

    #[tokio::test]
    async fn test_deliver_when_connected() {
        let link = RecordingLink::new(true);
        let dispatcher = EventDispatcher::new(link.clone());

        assert!(dispatcher.deliver(sample()).await);
        let messages = link.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "call_event");
        assert_eq!(messages[0]["data"]["number"], "+15551234567");
    }

    #[tokio::test]
    async fn test_drop_when_disconnected() {
        let link = RecordingLink::new(false);
        let dispatcher = EventDispatcher::new(link.clone());

        assert!(!dispatcher.deliver(sample()).await);
        assert!(!dispatcher.deliver(sample()).await);
        assert_eq!(link.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_send_is_not_retried() {
        let link = RecordingLink::new(true);
        link.accept.store(false, Ordering::SeqCst);
        let dispatcher = EventDispatcher::new(link.clone());

        assert!(!dispatcher.deliver(sample()).await);
        assert_eq!(link.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_preserves_order_with_slow_link() {
        let recorded = RecordingLink::new(true);
        let dispatcher = EventDispatcher::new(Arc::new(SlowLink {
            inner: recorded.clone(),
            marker: "\"ringing\"",
            delay: Duration::from_millis(300),
        }));

        dispatcher.dispatch(event(CallEventState::Ringing));
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.dispatch(event(CallEventState::Missed));

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorded.sends.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let states: Vec<_> = recorded
            .messages()
            .iter()
            .map(|m| m["data"]["state"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(states, vec!["ringing", "missed"]);
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_disconnected() {
        let link = RecordingLink::new(false);
        let dispatcher = EventDispatcher::new(link.clone());

        dispatcher.dispatch(sample());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.sends.load(Ordering::SeqCst), 0);

        link.connected.store(true, Ordering::SeqCst);
        dispatcher.dispatch(event(CallEventState::Idle));

        let deadline = Instant::now() + Duration::from_secs(5);
        while link.sends.load(Ordering::SeqCst) < 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let messages = link.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["data"]["state"], "idle");
    }
}
