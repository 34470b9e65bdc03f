//! Collaborator contracts: identity roster, attendance log, notifications.

use crate::types::{AttendanceEntry, AttendanceRecord, ContactInfo, Identity, NewIdentity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing schema does not know this field. Drives the degraded write.
    #[error("field not recognised by schema: {0}")]
    UnknownField(String),
    #[error("storage backend: {0}")]
    Backend(String),
}

pub trait IdentityStore {
    /// Persist a new identity, returning it with its assigned id.
    fn insert(&mut self, identity: NewIdentity) -> Result<Identity, StoreError>;
    fn list_all(&self) -> Result<Vec<Identity>, StoreError>;
    fn get(&self, id: &str) -> Result<Option<Identity>, StoreError>;
}

/// Attendance fields a store may not have provisioned.
pub const CAPTURED_IMAGE_FIELD: &str = "captured_image";

pub trait AttendanceStore {
    fn insert(&mut self, record: &AttendanceRecord) -> Result<(), StoreError>;
    /// Most recent first, at most `limit` rows.
    fn history(&self, limit: usize) -> Result<Vec<AttendanceEntry>, StoreError>;
    /// All rows for one identity, most recent first.
    fn for_identity(&self, identity_id: &str) -> Result<Vec<AttendanceEntry>, StoreError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort delivery; the engine ignores failures beyond logging them.
pub trait Notifier {
    fn notify(&self, contact: &ContactInfo, event: &AttendanceEvent) -> Result<(), String>;
}

/// Notifier that only records the event in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, contact: &ContactInfo, event: &AttendanceEvent) -> Result<(), String> {
        tracing::info!(
            identity = %event.identity_id,
            name = %event.display_name,
            at = %event.timestamp,
            email = contact.email.is_some(),
            phone = contact.phone.is_some(),
            "attendance notification"
        );
        Ok(())
    }
}
