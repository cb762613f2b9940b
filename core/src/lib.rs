pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod machine;
pub mod reconciler;
pub mod signal;
pub mod sync;
pub mod telephony;

pub use config::SyncConfig;
pub use dedup::Deduplicator;
pub use dispatcher::{EventDispatcher, PeerLink};
pub use engine::CallSyncEngine;
pub use enrichment::{ContactDirectory, ContactEnricher, NoContacts};
pub use error::{Result, SyncError};
pub use events::{
    CallDirection, CallEvent, CallEventState, CallHistoryBatch, UNKNOWN_NUMBER, WireMessage,
};
pub use machine::{CallSessionContext, CallStateMachine, PlannedEmission};
pub use reconciler::{CallLogSource, HistoricalReconciler, NoCallLog};
pub use signal::SignalAdapter;
pub use sync::CallLogSync;
pub use telephony::{CallLogRow, CallLogType, CallTransition, RawCallState, TelephonySignal};
