//! rollcall-core — Face matching and attendance resolution engine.
//!
//! Faces are embedded with an ONNX detector + recognizer when the models are
//! present, or reduced to a deterministic HSV colour histogram when they are
//! not. Embeddings carry their extraction path so the two regimes are never
//! cross-compared.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod geofence;
pub mod histogram;
pub mod liveness;
pub mod matcher;
pub mod models;
pub mod recognizer;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;

pub use extractor::EmbeddingExtractor;
pub use geofence::{GeoSite, GeofenceCheck};
pub use liveness::LivenessGate;
pub use matcher::{match_embeddings, MatchOutcome};
pub use resolver::{AttendanceReport, AttendanceResolver, FaceOutcome, FlowError, ResolverPolicy};
pub use store::{AttendanceStore, IdentityStore, Notifier, StoreError};
pub use types::{
    AttendanceEntry, AttendanceRecord, ContactInfo, Embedding, Identity, Location, NewIdentity,
};

use std::path::PathBuf;

/// Per-user data directory: `$XDG_DATA_HOME/rollcall`, falling back to
/// `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Default model directory: `<data dir>/models`.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
