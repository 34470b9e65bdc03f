use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of every embedding produced by either extraction path.
pub const EMBEDDING_DIM: usize = 128;

/// Face embedding, tagged with the extraction path that produced it.
///
/// Vectors from different paths live in different metric spaces and are
/// never compared numerically against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Embedding {
    /// Learned face embedding from the ONNX recognizer.
    Primary(Vec<f32>),
    /// L2-normalized HSV colour histogram.
    Fallback(Vec<f32>),
}

impl Embedding {
    pub fn values(&self) -> &[f32] {
        match self {
            Embedding::Primary(v) | Embedding::Fallback(v) => v,
        }
    }

    pub fn kind(&self) -> EmbeddingKind {
        match self {
            Embedding::Primary(_) => EmbeddingKind::Primary,
            Embedding::Fallback(_) => EmbeddingKind::Fallback,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none()
    }
}

/// Registration payload handed to the identity store.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub display_name: String,
    pub contact: ContactInfo,
    pub embedding: Embedding,
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub contact: ContactInfo,
    /// `None` when the stored vector is missing or could not be decoded.
    #[serde(default)]
    pub embedding: Option<Embedding>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// Frame-level liveness decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Liveness {
    pub is_live: bool,
    /// Score in [0, 1].
    pub score: f32,
}

/// Append-only record of one matched face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub timestamp: DateTime<Utc>,
    pub liveness_score: f32,
    /// `(1 - distance) * 100` of the winning match.
    pub confidence: f32,
    /// JPEG re-encoding of the full frame.
    #[serde(skip)]
    pub captured_image: Option<Vec<u8>>,
    pub location: Option<Location>,
}

/// A persisted attendance row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub id: i64,
    pub identity_id: String,
    /// Display name joined from the identity table, when the identity still exists.
    pub display_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub liveness_score: f32,
    pub confidence: f32,
    pub has_image: bool,
    pub location: Option<Location>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_serializes_with_kind_tag() {
        let emb = Embedding::Fallback(vec![0.5, 0.25]);
        let json = serde_json::to_value(&emb).unwrap();
        assert_eq!(json["kind"], "fallback");
        assert_eq!(json["values"][0], 0.5);

        let back: Embedding = serde_json::from_value(json).unwrap();
        assert_eq!(back, emb);
    }

    #[test]
    fn test_embedding_values_roundtrip_exactly() {
        let values: Vec<f32> = (0..EMBEDDING_DIM)
            .map(|i| (i as f32).sqrt() / 13.0)
            .collect();
        let emb = Embedding::Primary(values.clone());
        let text = serde_json::to_string(&emb).unwrap();
        let back: Embedding = serde_json::from_str(&text).unwrap();
        assert_eq!(back.values(), values.as_slice());
        assert_eq!(back.kind(), EmbeddingKind::Primary);
    }

    #[test]
    fn test_record_timestamp_is_iso8601_utc() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = AttendanceRecord {
            identity_id: "abc".into(),
            timestamp: ts,
            liveness_score: 0.95,
            confidence: 100.0,
            captured_image: Some(vec![1, 2, 3]),
            location: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], "2026-03-01T08:30:00Z");
        assert!(json.get("captured_image").is_none());
    }
}
