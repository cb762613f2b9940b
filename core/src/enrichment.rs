use crate::error::Result;
use crate::events::CallEvent;
use crate::telephony::redact_number;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-only access to the device's contacts. Implementations may fail at
/// any time (for instance when the contacts permission is revoked).
pub trait ContactDirectory: Send + Sync {
    /// Display name for `number`, `None` when no contact matches
    fn find_contact_name(&self, number: &str) -> Result<Option<String>>;
    /// E.164 form of `number` if the platform can produce one
    fn normalize_number(&self, number: &str) -> Result<Option<String>>;
    /// Raw thumbnail bytes for the contact owning `number`
    fn contact_photo(&self, number: &str) -> Result<Option<Vec<u8>>>;
}

/// Directory used when the host provides no contacts access
pub struct NoContacts;

impl ContactDirectory for NoContacts {
    fn find_contact_name(&self, _number: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn normalize_number(&self, _number: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn contact_photo(&self, _number: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Best-effort enrichment of call events. Every lookup failure degrades to
/// "absent".
#[derive(Clone)]
pub struct ContactEnricher {
    directory: Arc<dyn ContactDirectory>,
    attach_photos: bool,
}

impl ContactEnricher {
    pub fn new(directory: Arc<dyn ContactDirectory>, attach_photos: bool) -> Self {
        Self {
            directory,
            attach_photos,
        }
    }

    /// Fills name and normalized number. The photo is looked up only when
    /// `include_photo` is set and the event describes a live call.
    pub fn enrich(&self, event: CallEvent, include_photo: bool) -> CallEvent {
        if !event.has_known_number() {
            return event;
        }

        let number = event.number.clone();
        let name = self.contact_name(&number);
        let normalized = self.normalized_number(&number);
        let photo = if include_photo && self.attach_photos && event.state.wants_photo() {
            self.photo(&number)
        } else {
            None
        };

        event
            .with_contact_name(name)
            .with_normalized_number(normalized)
            .with_contact_photo(photo)
    }

    pub fn contact_name(&self, number: &str) -> Option<String> {
        match self.directory.find_contact_name(number) {
            Ok(Some(name)) if name.trim() == number => {
                debug!("Contact lookup echoed the number back, ignoring");
                None
            }
            Ok(name) => name,
            Err(e) => {
                log_lookup_failure("contact name", number, &e);
                None
            }
        }
    }

    /// Falls back to the raw number when normalization fails or yields
    /// something that is not E.164.
    pub fn normalized_number(&self, number: &str) -> Option<String> {
        let normalized = match self.directory.normalize_number(number) {
            Ok(value) => value,
            Err(e) => {
                log_lookup_failure("number normalization", number, &e);
                None
            }
        };

        normalized
            .map(|n| n.trim().to_string())
            .filter(|n| n.starts_with('+'))
            .or_else(|| number.starts_with('+').then(|| number.to_string()))
    }

    pub fn photo(&self, number: &str) -> Option<String> {
        match self.directory.contact_photo(number) {
            Ok(Some(bytes)) if !bytes.is_empty() => Some(BASE64.encode(bytes)),
            Ok(_) => None,
            Err(e) => {
                log_lookup_failure("contact photo", number, &e);
                None
            }
        }
    }
}

fn log_lookup_failure(what: &str, number: &str, error: &crate::error::SyncError) {
    if error.is_permission_denied() {
        debug!("{} lookup for {} not permitted: {}", what, redact_number(number), error);
    } else {
        warn!("{} lookup for {} failed: {}", what, redact_number(number), error);
    }
}
