use callsync_core::{
    CallLogRow, CallLogSource, CallSyncEngine, ContactDirectory, PeerLink, SyncConfig, SyncError,
    TelephonySignal,
};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[cfg(target_os = "android")]
static ANDROID_LOGGER_INIT: OnceLock<()> = OnceLock::new();

#[cfg(target_os = "android")]
fn init_android_logging() {
    ANDROID_LOGGER_INIT.get_or_init(|| {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("callsync_core"),
        );
        tracing_log::LogTracer::init().ok();
    });
}

#[cfg(not(target_os = "android"))]
fn init_android_logging() {}

// ============================================================================
// Global State (The "Singleton" for FFI)
// ============================================================================

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static INSTANCE: OnceLock<RwLock<Option<Arc<CallSyncEngine>>>> = OnceLock::new();

fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("callsync")
            .enable_all()
            .build()
            .expect("Failed to create Tokio runtime")
    })
}

fn get_engine() -> Result<Arc<CallSyncEngine>, CallSyncFfiError> {
    let lock = INSTANCE.get_or_init(|| RwLock::new(None));
    let read = lock.read();
    read.clone().ok_or(CallSyncFfiError::NotInitialized)
}

// ============================================================================
// UniFFI Types
// ============================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CallSyncFfiError {
    #[error("Not initialized")]
    NotInitialized,
    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },
    #[error("Engine error: {msg}")]
    Engine { msg: String },
}

impl From<SyncError> for CallSyncFfiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidConfig(msg) => CallSyncFfiError::InvalidArgument { msg },
            SyncError::Serialization(e) => CallSyncFfiError::InvalidArgument { msg: e.to_string() },
            other => CallSyncFfiError::Engine {
                msg: other.to_string(),
            },
        }
    }
}

/// Errors the host reports from its content provider queries
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum LookupError {
    #[error("Permission denied: {msg}")]
    PermissionDenied { msg: String },
    #[error("Lookup failed: {msg}")]
    Failed { msg: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for LookupError {
    fn from(err: uniffi::UnexpectedUniFFICallbackError) -> Self {
        LookupError::Failed { msg: err.reason }
    }
}

impl From<LookupError> for SyncError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::PermissionDenied { msg } => SyncError::PermissionDenied(msg),
            LookupError::Failed { msg } => SyncError::Provider(msg),
        }
    }
}

/// One call log cursor row as read by the host
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCallLogRow {
    pub id: Option<i64>,
    pub number: Option<String>,
    pub call_type: Option<i32>,
    pub date: Option<i64>,
    pub duration: Option<i64>,
    pub sim_slot: Option<i32>,
}

impl From<FfiCallLogRow> for CallLogRow {
    fn from(r: FfiCallLogRow) -> Self {
        Self {
            id: r.id,
            number: r.number,
            call_type: r.call_type,
            date: r.date,
            duration: r.duration,
            sim_slot: r.sim_slot,
        }
    }
}

// ============================================================================
// Callbacks
// ============================================================================

#[uniffi::export(callback_interface)]
pub trait PeerLinkCallback: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send_message(&self, payload: String) -> bool;
}

#[uniffi::export(callback_interface)]
pub trait ContactLookupCallback: Send + Sync {
    fn find_contact_name(&self, number: String) -> Result<Option<String>, LookupError>;
    fn normalize_number(&self, number: String) -> Result<Option<String>, LookupError>;
    fn contact_photo(&self, number: String) -> Result<Option<Vec<u8>>, LookupError>;
}

#[uniffi::export(callback_interface)]
pub trait CallLogCallback: Send + Sync {
    fn query_since(&self, since_millis: i64) -> Result<Vec<FfiCallLogRow>, LookupError>;
}

struct PeerLinkBridge(Box<dyn PeerLinkCallback>);

impl PeerLink for PeerLinkBridge {
    fn is_connected(&self) -> bool {
        self.0.is_connected()
    }

    fn send_message(&self, payload: String) -> bool {
        self.0.send_message(payload)
    }
}

struct ContactsBridge(Box<dyn ContactLookupCallback>);

impl ContactDirectory for ContactsBridge {
    fn find_contact_name(&self, number: &str) -> callsync_core::Result<Option<String>> {
        self.0.find_contact_name(number.to_string()).map_err(Into::into)
    }

    fn normalize_number(&self, number: &str) -> callsync_core::Result<Option<String>> {
        self.0.normalize_number(number.to_string()).map_err(Into::into)
    }

    fn contact_photo(&self, number: &str) -> callsync_core::Result<Option<Vec<u8>>> {
        self.0.contact_photo(number.to_string()).map_err(Into::into)
    }
}

struct CallLogBridge(Box<dyn CallLogCallback>);

impl CallLogSource for CallLogBridge {
    fn query_since(&self, since_millis: i64) -> callsync_core::Result<Vec<CallLogRow>> {
        self.0
            .query_since(since_millis)
            .map(|rows| rows.into_iter().map(Into::into).collect())
            .map_err(Into::into)
    }
}

// ============================================================================
// Exported Functions
// ============================================================================

/// Start the engine. `config_json` may be empty to use the defaults.
#[uniffi::export]
pub fn initialize(
    config_json: String,
    link: Box<dyn PeerLinkCallback>,
    contacts: Box<dyn ContactLookupCallback>,
    call_log: Box<dyn CallLogCallback>,
) -> Result<(), CallSyncFfiError> {
    init_android_logging();

    let config = if config_json.trim().is_empty() {
        SyncConfig::default()
    } else {
        SyncConfig::from_json(&config_json)?
    };

    let runtime = get_runtime();
    let engine = {
        let _guard = runtime.enter();
        CallSyncEngine::start(
            config,
            Arc::new(PeerLinkBridge(link)),
            Arc::new(ContactsBridge(contacts)),
            Arc::new(CallLogBridge(call_log)),
        )?
    };

    let lock = INSTANCE.get_or_init(|| RwLock::new(None));
    if let Some(previous) = lock.write().replace(Arc::new(engine)) {
        warn!("Replacing an engine that was never shut down");
        previous.shutdown();
    }

    Ok(())
}

/// Called from the phone-state broadcast receiver(s). `state` is the
/// platform's symbolic state name.
#[uniffi::export]
pub fn on_phone_state_changed(
    state: String,
    incoming_number: Option<String>,
    sim_slot: Option<i32>,
) -> Result<(), CallSyncFfiError> {
    let engine = get_engine()?;
    engine
        .submit(TelephonySignal::phone_state(&state, incoming_number, sim_slot))
        .map_err(Into::into)
}

#[uniffi::export]
pub fn on_new_outgoing_call(number: String) -> Result<(), CallSyncFfiError> {
    let engine = get_engine()?;
    engine
        .submit(TelephonySignal::NewOutgoingCall { number })
        .map_err(Into::into)
}

/// Called from the call log content observer
#[uniffi::export]
pub fn on_call_log_changed() -> Result<(), CallSyncFfiError> {
    let engine = get_engine()?;
    engine.call_log().notify_changed();
    Ok(())
}

/// Reconcile immediately. Returns the number of events pushed.
/// Blocks: the caller must run this off the main thread.
#[uniffi::export]
pub fn sync_call_log_now() -> Result<u32, CallSyncFfiError> {
    let engine = get_engine()?;
    let batch = get_runtime().block_on(async { engine.call_log().sync_now().await });
    Ok(batch.events.len() as u32)
}

#[uniffi::export]
pub fn get_call_log_checkpoint() -> Result<i64, CallSyncFfiError> {
    let engine = get_engine()?;
    Ok(engine.call_log().checkpoint())
}

/// Restore a checkpoint persisted by the host
#[uniffi::export]
pub fn set_call_log_checkpoint(checkpoint: i64) -> Result<(), CallSyncFfiError> {
    if checkpoint < 0 {
        return Err(CallSyncFfiError::InvalidArgument {
            msg: "Checkpoint must not be negative".into(),
        });
    }
    let engine = get_engine()?;
    engine.call_log().set_checkpoint(checkpoint);
    Ok(())
}

#[uniffi::export]
pub fn get_device_id() -> Result<String, CallSyncFfiError> {
    let engine = get_engine()?;
    Ok(engine.config().device_id.clone())
}

#[uniffi::export]
pub fn shutdown() {
    info!("Shutting down call sync FFI...");

    let engine = {
        let mut lock = INSTANCE.get_or_init(|| RwLock::new(None)).write();
        lock.take()
    };

    if let Some(e) = engine {
        e.shutdown();
    }

    info!("Call sync FFI shutdown complete");
}

uniffi::setup_scaffolding!();
