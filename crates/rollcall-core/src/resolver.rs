//! Attendance resolution: liveness → geofence → extraction → roster scan → persistence.
//!
//! Each call is independent. Liveness and geofence are evaluated once per
//! frame; every probe face then scans the full roster on its own and yields
//! exactly one [`FaceOutcome`].

use crate::extractor::{load_rgb, EmbeddingExtractor};
use crate::geofence::{GeoSite, GeofenceCheck};
use crate::liveness::LivenessGate;
use crate::matcher::{self, PRIMARY_TOLERANCE};
use crate::store::{
    AttendanceEvent, AttendanceStore, IdentityStore, LogNotifier, Notifier, StoreError,
    CAPTURED_IMAGE_FIELD,
};
use crate::types::{AttendanceRecord, ContactInfo, Embedding, Identity, Location, NewIdentity};
use chrono::Utc;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Note attached to a success whose frame could not be stored.
pub const IMAGE_DROPPED_MESSAGE: &str = "Attendance marked (image save failed)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverPolicy {
    pub site: GeoSite,
    /// Reject frames outside the site radius instead of only logging them.
    pub enforce_geofence: bool,
    /// Primary-regime match tolerance.
    pub tolerance: f32,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            site: GeoSite::default(),
            enforce_geofence: false,
            tolerance: PRIMARY_TOLERANCE,
        }
    }
}

/// Result for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FaceOutcome {
    Success {
        person: String,
        identity_id: String,
        liveness: String,
        confidence: f32,
        location: Option<Location>,
        /// Set when the record was written in degraded form.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// No roster identity within tolerance.
    #[serde(rename = "failed")]
    Unknown { message: String },
    /// Matched, but the record could not be persisted.
    Error { message: String },
}

impl FaceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FaceOutcome::Success { .. })
    }
}

/// Result of one attendance call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttendanceReport {
    Processed {
        results: Vec<FaceOutcome>,
        total_faces: usize,
        marked_count: usize,
        geofence: Option<GeofenceCheck>,
    },
    InvalidImage,
    LivenessFailed { score: f32 },
    OutsideGeofence { distance_m: f64 },
    NoFaceDetected,
    Internal { message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("invalid or unreadable image")]
    InvalidImage,
    #[error("liveness check failed (score {score:.2})")]
    LivenessFailed { score: f32 },
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{0} faces detected; exactly one person must be in frame")]
    MultipleFaces(usize),
    #[error("face not recognized")]
    NotRecognized,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Best-confidence match for `probe` across `roster`.
///
/// Identities without a usable stored embedding are skipped. Ties keep the
/// earliest identity in roster order.
pub fn best_match<'r>(
    probe: &Embedding,
    roster: &'r [Identity],
    tolerance: f32,
) -> Option<(&'r Identity, f32)> {
    let mut best: Option<&Identity> = None;
    let mut best_score = 0.0f32;

    for identity in roster {
        let Some(stored) = identity.embedding.as_ref().filter(|e| !e.is_empty()) else {
            continue;
        };
        let outcome = matcher::match_embeddings(probe, stored, tolerance);
        tracing::debug!(
            identity = %identity.id,
            distance = outcome.distance,
            matched = outcome.is_match,
            "roster comparison"
        );
        if outcome.is_match {
            let score = outcome.confidence();
            if score > best_score {
                best_score = score;
                best = Some(identity);
            }
        }
    }

    best.map(|identity| (identity, best_score))
}

fn encode_jpeg(image: &RgbImage) -> Option<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match image.write_to(&mut buf, ImageFormat::Jpeg) {
        Ok(()) => Some(buf.into_inner()),
        Err(e) => {
            tracing::warn!(error = %e, "could not re-encode frame; record will omit image");
            None
        }
    }
}

pub struct AttendanceResolver<S> {
    store: S,
    extractor: EmbeddingExtractor,
    liveness: LivenessGate,
    notifier: Box<dyn Notifier + Send>,
    policy: ResolverPolicy,
}

impl<S> AttendanceResolver<S>
where
    S: IdentityStore + AttendanceStore,
{
    pub fn new(
        store: S,
        extractor: EmbeddingExtractor,
        liveness: LivenessGate,
        policy: ResolverPolicy,
    ) -> Self {
        Self {
            store,
            extractor,
            liveness,
            notifier: Box::new(LogNotifier),
            policy,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier + Send>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &ResolverPolicy {
        &self.policy
    }

    pub fn models_loaded(&self) -> (bool, bool) {
        (
            self.extractor.has_encoder(),
            self.liveness.is_model_backed(),
        )
    }

    pub fn mark_attendance(
        &mut self,
        image_path: &Path,
        location: Option<Location>,
    ) -> AttendanceReport {
        match load_rgb(image_path) {
            Some(image) => self.mark_attendance_image(&image, location),
            None => AttendanceReport::InvalidImage,
        }
    }

    pub fn mark_attendance_image(
        &mut self,
        image: &RgbImage,
        location: Option<Location>,
    ) -> AttendanceReport {
        let liveness = self.liveness.check_image(image);
        tracing::info!(
            is_live = liveness.is_live,
            score = liveness.score,
            "liveness evaluated"
        );
        if !liveness.is_live {
            return AttendanceReport::LivenessFailed {
                score: liveness.score,
            };
        }

        let geofence = match location {
            Some(loc) => {
                let check = self.policy.site.check(Some(loc.lat), Some(loc.lng));
                let distance_m = check.distance_m.unwrap_or_default();
                tracing::info!(
                    lat = loc.lat,
                    lng = loc.lng,
                    distance_m,
                    valid = check.valid,
                    "geofence evaluated"
                );
                if !check.valid {
                    if self.policy.enforce_geofence {
                        return AttendanceReport::OutsideGeofence { distance_m };
                    }
                    tracing::warn!(distance_m, "outside site radius (enforcement disabled)");
                }
                Some(check)
            }
            None => {
                tracing::info!("no location supplied; skipping geofence");
                None
            }
        };

        let probes = self.extractor.extract_image(image);
        tracing::info!(faces = probes.len(), "probe embeddings extracted");
        if probes.is_empty() {
            return AttendanceReport::NoFaceDetected;
        }

        let roster = match self.store.list_all() {
            Ok(roster) => roster,
            Err(e) => {
                tracing::error!(error = %e, "could not load identity roster");
                return AttendanceReport::Internal {
                    message: e.to_string(),
                };
            }
        };
        tracing::debug!(identities = roster.len(), "roster loaded");

        // JPEG of the full frame, encoded lazily on first match.
        let mut frame_jpeg: Option<Option<Vec<u8>>> = None;
        let mut results = Vec::with_capacity(probes.len());
        let tolerance = self.policy.tolerance;

        for probe in &probes {
            let Some((identity, confidence)) = best_match(probe, &roster, tolerance) else {
                tracing::info!("no roster match for face");
                results.push(FaceOutcome::Unknown {
                    message: "Unknown face".into(),
                });
                continue;
            };
            tracing::info!(
                identity = %identity.id,
                name = %identity.display_name,
                confidence,
                "face matched"
            );

            let captured_image = frame_jpeg.get_or_insert_with(|| encode_jpeg(image)).clone();
            let record = AttendanceRecord {
                identity_id: identity.id.clone(),
                timestamp: Utc::now(),
                liveness_score: liveness.score,
                confidence,
                captured_image,
                location,
            };
            results.push(self.persist(identity, record));
        }

        let marked_count = results.iter().filter(|r| r.is_success()).count();
        tracing::info!(
            total_faces = probes.len(),
            marked_count,
            "attendance processed"
        );
        AttendanceReport::Processed {
            results,
            total_faces: probes.len(),
            marked_count,
            geofence,
        }
    }

    /// Write one record, retrying once without the image when the schema
    /// lacks the image field.
    fn persist(&mut self, identity: &Identity, mut record: AttendanceRecord) -> FaceOutcome {
        let mut message = None;
        match AttendanceStore::insert(&mut self.store, &record) {
            Ok(()) => {}
            Err(StoreError::UnknownField(field))
                if field == CAPTURED_IMAGE_FIELD && record.captured_image.is_some() =>
            {
                tracing::warn!(
                    identity = %identity.id,
                    "image field not provisioned; retrying without it"
                );
                record.captured_image = None;
                if let Err(e) = AttendanceStore::insert(&mut self.store, &record) {
                    tracing::error!(
                        identity = %identity.id,
                        error = %e,
                        "degraded attendance write failed"
                    );
                    return Self::write_error(identity);
                }
                message = Some(IMAGE_DROPPED_MESSAGE.to_string());
            }
            Err(e) => {
                tracing::error!(identity = %identity.id, error = %e, "attendance write failed");
                return Self::write_error(identity);
            }
        }

        let event = AttendanceEvent {
            identity_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            timestamp: record.timestamp,
        };
        if let Err(e) = self.notifier.notify(&identity.contact, &event) {
            tracing::warn!(identity = %identity.id, error = %e, "notification failed");
        }

        FaceOutcome::Success {
            person: identity.display_name.clone(),
            identity_id: identity.id.clone(),
            liveness: "verified".into(),
            confidence: record.confidence,
            location: record.location,
            message,
        }
    }

    fn write_error(identity: &Identity) -> FaceOutcome {
        FaceOutcome::Error {
            message: format!("DB Error for {}", identity.display_name),
        }
    }

    /// Enroll a new identity from a frame containing exactly one face.
    pub fn register(
        &mut self,
        display_name: &str,
        contact: ContactInfo,
        image_path: &Path,
    ) -> Result<Identity, FlowError> {
        let image = load_rgb(image_path).ok_or(FlowError::InvalidImage)?;
        self.register_image(display_name, contact, &image)
    }

    pub fn register_image(
        &mut self,
        display_name: &str,
        contact: ContactInfo,
        image: &RgbImage,
    ) -> Result<Identity, FlowError> {
        let liveness = self.liveness.check_image(image);
        if !liveness.is_live {
            return Err(FlowError::LivenessFailed {
                score: liveness.score,
            });
        }

        let mut embeddings = self.extractor.extract_image(image);
        let embedding = match embeddings.len() {
            0 => return Err(FlowError::NoFaceDetected),
            1 => embeddings.remove(0),
            n => return Err(FlowError::MultipleFaces(n)),
        };

        let new_identity = NewIdentity {
            display_name: display_name.to_string(),
            contact,
            embedding,
        };
        let identity = IdentityStore::insert(&mut self.store, new_identity)?;
        tracing::info!(
            identity = %identity.id,
            name = %identity.display_name,
            "identity registered"
        );
        Ok(identity)
    }

    /// Identify the first face in the frame against the roster.
    pub fn login(&mut self, image_path: &Path) -> Result<Identity, FlowError> {
        let image = load_rgb(image_path).ok_or(FlowError::InvalidImage)?;
        self.login_image(&image)
    }

    pub fn login_image(&mut self, image: &RgbImage) -> Result<Identity, FlowError> {
        let probes = self.extractor.extract_image(image);
        let probe = probes.first().ok_or(FlowError::NoFaceDetected)?;
        let roster = self.store.list_all()?;

        let (identity, confidence) = best_match(probe, &roster, self.policy.tolerance)
            .ok_or(FlowError::NotRecognized)?;
        tracing::info!(identity = %identity.id, confidence, "login matched");
        Ok(identity.clone())
    }
}
