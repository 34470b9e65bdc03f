use crate::config::Config;
use crate::store::SqliteStore;
use rollcall_core::models::{self, FaceEncoder, LandmarkModel};
use rollcall_core::store::{AttendanceStore, IdentityStore, StoreError};
use rollcall_core::{
    AttendanceEntry, AttendanceReport, AttendanceResolver, ContactInfo, EmbeddingExtractor,
    FlowError, Identity, LivenessGate, Location,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of what the engine is running with.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub encoder_loaded: bool,
    pub liveness_model_loaded: bool,
    pub identities: usize,
    pub enforce_geofence: bool,
    pub tolerance: f32,
}

/// An identity (if it still exists) and its attendance rows.
pub type IdentityRows = (Option<Identity>, Vec<AttendanceEntry>);

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        display_name: String,
        contact: ContactInfo,
        image_path: PathBuf,
        reply: oneshot::Sender<Result<Identity, EngineError>>,
    },
    MarkAttendance {
        image_path: PathBuf,
        location: Option<Location>,
        reply: oneshot::Sender<AttendanceReport>,
    },
    Login {
        image_path: PathBuf,
        reply: oneshot::Sender<Result<Identity, EngineError>>,
    },
    History {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<AttendanceEntry>, EngineError>>,
    },
    IdentityHistory {
        identity_id: String,
        reply: oneshot::Sender<Result<IdentityRows, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn register(
        &self,
        display_name: String,
        contact: ContactInfo,
        image_path: PathBuf,
    ) -> Result<Identity, EngineError> {
        self.request(|reply| EngineRequest::Register {
            display_name,
            contact,
            image_path,
            reply,
        })
        .await?
    }

    pub async fn mark_attendance(
        &self,
        image_path: PathBuf,
        location: Option<Location>,
    ) -> Result<AttendanceReport, EngineError> {
        self.request(|reply| EngineRequest::MarkAttendance {
            image_path,
            location,
            reply,
        })
        .await
    }

    pub async fn login(&self, image_path: PathBuf) -> Result<Identity, EngineError> {
        self.request(|reply| EngineRequest::Login { image_path, reply })
            .await?
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<AttendanceEntry>, EngineError> {
        self.request(|reply| EngineRequest::History { limit, reply })
            .await?
    }

    pub async fn identity_history(&self, identity_id: String) -> Result<IdentityRows, EngineError> {
        self.request(|reply| EngineRequest::IdentityHistory {
            identity_id,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await?
    }
}

/// Open the database, load whatever models are present and start the engine.
///
/// Missing models are not fatal: extraction drops to colour histograms and
/// the liveness gate to its mocked score. The database is.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = SqliteStore::open(&config.db_path)?;

    let (encoder, landmarks) = models::load_models(&config.model_dir);
    let extractor = EmbeddingExtractor::new(encoder.map(|e| Box::new(e) as Box<dyn FaceEncoder>));
    let liveness = LivenessGate::new(landmarks.map(|m| Box::new(m) as Box<dyn LandmarkModel>));
    tracing::info!(
        model_dir = %config.model_dir.display(),
        encoder = extractor.has_encoder(),
        liveness_model = liveness.is_model_backed(),
        "models initialised"
    );

    let resolver = AttendanceResolver::new(store, extractor, liveness, config.policy());
    spawn_with(resolver)
}

/// Run `resolver` on a dedicated OS thread and return a handle to it.
pub fn spawn_with<S>(mut resolver: AttendanceResolver<S>) -> Result<EngineHandle, EngineError>
where
    S: IdentityStore + AttendanceStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut resolver, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle_request<S>(resolver: &mut AttendanceResolver<S>, req: EngineRequest)
where
    S: IdentityStore + AttendanceStore,
{
    // A dropped receiver means the caller gave up; nothing to do.
    match req {
        EngineRequest::Register {
            display_name,
            contact,
            image_path,
            reply,
        } => {
            let result = resolver
                .register(&display_name, contact, &image_path)
                .map_err(EngineError::from);
            let _ = reply.send(result);
        }
        EngineRequest::MarkAttendance {
            image_path,
            location,
            reply,
        } => {
            let _ = reply.send(resolver.mark_attendance(&image_path, location));
        }
        EngineRequest::Login { image_path, reply } => {
            let _ = reply.send(resolver.login(&image_path).map_err(EngineError::from));
        }
        EngineRequest::History { limit, reply } => {
            let _ = reply.send(resolver.store().history(limit).map_err(EngineError::from));
        }
        EngineRequest::IdentityHistory { identity_id, reply } => {
            let _ = reply.send(identity_rows(resolver.store(), &identity_id));
        }
        EngineRequest::Status { reply } => {
            let (encoder_loaded, liveness_model_loaded) = resolver.models_loaded();
            let policy = resolver.policy();
            let result = resolver
                .store()
                .list_all()
                .map(|roster| EngineStatus {
                    encoder_loaded,
                    liveness_model_loaded,
                    identities: roster.len(),
                    enforce_geofence: policy.enforce_geofence,
                    tolerance: policy.tolerance,
                })
                .map_err(EngineError::from);
            let _ = reply.send(result);
        }
    }
}

fn identity_rows<S>(store: &S, identity_id: &str) -> Result<IdentityRows, EngineError>
where
    S: IdentityStore + AttendanceStore,
{
    let identity = store.get(identity_id)?;
    Ok((identity, store.for_identity(identity_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rollcall_core::{FaceOutcome, ResolverPolicy};
    use std::path::Path;

    fn write_solid(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(48, 48, Rgb(rgb)).save(&path).unwrap();
        path
    }

    fn test_engine() -> EngineHandle {
        let resolver = AttendanceResolver::new(
            SqliteStore::open_in_memory().unwrap(),
            EmbeddingExtractor::fallback_only(),
            LivenessGate::mocked(),
            ResolverPolicy::default(),
        );
        spawn_with(resolver).unwrap()
    }

    #[tokio::test]
    async fn test_register_then_mark_attendance() {
        let dir = tempfile::tempdir().unwrap();
        let red = write_solid(dir.path(), "red.png", [220, 20, 20]);
        let engine = test_engine();

        let identity = engine
            .register("Red".into(), ContactInfo::default(), red.clone())
            .await
            .unwrap();

        let site = Location {
            lat: 12.9716,
            lng: 77.5946,
        };
        match engine.mark_attendance(red, Some(site)).await.unwrap() {
            AttendanceReport::Processed {
                results,
                marked_count,
                ..
            } => {
                assert_eq!(marked_count, 1);
                match &results[0] {
                    FaceOutcome::Success { identity_id, .. } => {
                        assert_eq!(*identity_id, identity.id)
                    }
                    other => panic!("unexpected outcome {other:?}"),
                }
            }
            other => panic!("expected processed report, got {other:?}"),
        }

        let (found, rows) = engine.identity_history(identity.id.clone()).await.unwrap();
        assert_eq!(found.map(|i| i.display_name).as_deref(), Some("Red"));
        assert_eq!(rows.len(), 1);
        assert!(rows[0].has_image);

        let history = engine.history(10).await.unwrap();
        assert_eq!(history[0].display_name.as_deref(), Some("Red"));
    }

    #[tokio::test]
    async fn test_login_unknown_face() {
        let dir = tempfile::tempdir().unwrap();
        let red = write_solid(dir.path(), "red.png", [220, 20, 20]);
        let blue = write_solid(dir.path(), "blue.png", [20, 20, 220]);
        let engine = test_engine();

        engine
            .register("Red".into(), ContactInfo::default(), red.clone())
            .await
            .unwrap();
        assert_eq!(engine.login(red).await.unwrap().display_name, "Red");
        assert!(matches!(
            engine.login(blue).await,
            Err(EngineError::Flow(FlowError::NotRecognized))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_image_is_invalid() {
        let engine = test_engine();
        let frame = PathBuf::from("/nonexistent/frame.jpg");
        let report = engine.mark_attendance(frame, None).await.unwrap();
        assert_eq!(report, AttendanceReport::InvalidImage);
    }

    #[tokio::test]
    async fn test_status_reports_fallback_mode() {
        let engine = test_engine();
        let status = engine.status().await.unwrap();
        assert!(!status.encoder_loaded);
        assert!(!status.liveness_model_loaded);
        assert_eq!(status.identities, 0);
    }
}
