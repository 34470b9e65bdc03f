use crate::engine::{EngineError, EngineHandle};
use rollcall_core::session::AdminAuth;
use rollcall_core::{ContactInfo, FlowError, Identity, Location};
use std::path::PathBuf;
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every payload is a JSON document. History queries need an admin token.
pub struct RollcallService {
    engine: EngineHandle,
    admin: Arc<AdminAuth>,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, admin: Arc<AdminAuth>) -> Self {
        Self { engine, admin }
    }

    fn require_admin(&self, token: &str) -> fdo::Result<()> {
        if self.admin.verify(token) {
            Ok(())
        } else {
            let message = "invalid or expired admin session";
            Err(fdo::Error::AccessDenied(message.into()))
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Enroll a person from an image containing exactly one face.
    /// Empty `email` / `phone` mean "not provided".
    async fn register(
        &self,
        display_name: &str,
        email: &str,
        phone: &str,
        image_path: &str,
    ) -> fdo::Result<String> {
        tracing::info!(display_name, image_path, "register requested");
        let display_name = display_name.trim();
        if display_name.is_empty() {
            let message = "display name must not be empty";
            return Err(fdo::Error::InvalidArgs(message.into()));
        }
        let contact = contact_from(email, phone);
        let image_path = PathBuf::from(image_path);
        let identity = self
            .engine
            .register(display_name.to_string(), contact, image_path)
            .await
            .map_err(to_fdo)?;
        Ok(identity_summary(&identity).to_string())
    }

    /// Mark attendance for every recognised face in the frame.
    /// `location` is empty or `[lat, lng]`.
    async fn mark_attendance(&self, image_path: &str, location: Vec<f64>) -> fdo::Result<String> {
        tracing::info!(image_path, "mark_attendance requested");
        let location = parse_location(&location)?;
        let report = self
            .engine
            .mark_attendance(PathBuf::from(image_path), location)
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Identify the person in the frame.
    async fn login(&self, image_path: &str) -> fdo::Result<String> {
        tracing::info!(image_path, "login requested");
        let identity = self
            .engine
            .login(PathBuf::from(image_path))
            .await
            .map_err(to_fdo)?;
        Ok(identity_summary(&identity).to_string())
    }

    /// Most recent attendance rows across all identities.
    async fn history(&self, token: &str, limit: u32) -> fdo::Result<String> {
        self.require_admin(token)?;
        let entries = self.engine.history(limit as usize).await.map_err(to_fdo)?;
        to_json(&entries)
    }

    /// One identity and its attendance rows.
    async fn identity_history(&self, token: &str, identity_id: &str) -> fdo::Result<String> {
        self.require_admin(token)?;
        let (identity, entries) = self
            .engine
            .identity_history(identity_id.to_string())
            .await
            .map_err(to_fdo)?;
        Ok(serde_json::json!({
            "identity": identity.as_ref().map(identity_summary),
            "records": entries,
        })
        .to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "encoder_loaded": status.encoder_loaded,
            "liveness_model_loaded": status.liveness_model_loaded,
            "identities": status.identities,
            "enforce_geofence": status.enforce_geofence,
            "tolerance": status.tolerance,
            "admin_sessions": self.admin.sessions().active(),
        })
        .to_string())
    }

    /// Exchange admin credentials for a session token.
    async fn admin_login(&self, username: &str, password: &str) -> fdo::Result<String> {
        self.admin
            .login(username, password)
            .ok_or_else(|| fdo::Error::AccessDenied("invalid credentials".into()))
    }

    async fn admin_verify(&self, token: &str) -> fdo::Result<bool> {
        Ok(self.admin.verify(token))
    }

    async fn admin_logout(&self, token: &str) -> fdo::Result<()> {
        self.admin.logout(token);
        Ok(())
    }
}

fn contact_from(email: &str, phone: &str) -> ContactInfo {
    let non_empty = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string);
    ContactInfo {
        email: non_empty(email),
        phone: non_empty(phone),
    }
}

fn parse_location(raw: &[f64]) -> fdo::Result<Option<Location>> {
    match raw {
        [] => Ok(None),
        [lat, lng] if lat.is_finite() && lng.is_finite() => {
            let (lat, lng) = (*lat, *lng);
            Ok(Some(Location { lat, lng }))
        }
        _ => {
            let message = "location must be empty or [lat, lng]";
            Err(fdo::Error::InvalidArgs(message.into()))
        }
    }
}

/// Identity without its embedding vector.
fn identity_summary(identity: &Identity) -> serde_json::Value {
    serde_json::json!({
        "id": identity.id,
        "display_name": identity.display_name,
        "contact": identity.contact,
        "created_at": identity.created_at,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn to_fdo(err: EngineError) -> fdo::Error {
    match err {
        EngineError::Flow(FlowError::InvalidImage) => fdo::Error::InvalidArgs(err.to_string()),
        EngineError::Flow(FlowError::Store(e)) | EngineError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            fdo::Error::Failed(e.to_string())
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::StoreError;

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location(&[]).unwrap(), None);
        let site = Location {
            lat: 12.9716,
            lng: 77.5946,
        };
        assert_eq!(parse_location(&[12.9716, 77.5946]).unwrap(), Some(site));
        assert!(parse_location(&[12.9716]).is_err());
        assert!(parse_location(&[f64::NAN, 77.5946]).is_err());
    }

    #[test]
    fn test_contact_from_blanks() {
        let contact = contact_from("  ", "+91 80 5555 0100");
        assert_eq!(contact.email, None);
        assert_eq!(contact.phone.as_deref(), Some("+91 80 5555 0100"));
    }

    #[test]
    fn test_error_mapping() {
        let invalid = to_fdo(EngineError::Flow(FlowError::InvalidImage));
        assert!(matches!(invalid, fdo::Error::InvalidArgs(_)));
        match to_fdo(EngineError::Flow(FlowError::MultipleFaces(3))) {
            fdo::Error::Failed(msg) => assert!(msg.contains("3 faces")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            to_fdo(EngineError::Store(StoreError::Backend("locked".into()))),
            fdo::Error::Failed(_)
        ));
    }
}
