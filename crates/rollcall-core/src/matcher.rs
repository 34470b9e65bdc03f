//! Distance-based embedding comparison.
//!
//! Two regimes, chosen by the probe's [`Embedding`] variant:
//!
//! | Regime | Metric | Tolerance | Match rule |
//! |---|---|---|---|
//! | primary | Euclidean | caller-supplied, default 0.5 | `distance <= tolerance` |
//! | fallback | Euclidean on normalized histograms | fixed 0.65 | `distance < 0.65` |
//!
//! Vectors of different variants are never compared.

use crate::types::{Embedding, EMBEDDING_DIM};
use serde::Serialize;

pub const PRIMARY_TOLERANCE: f32 = 0.5;
pub const FALLBACK_TOLERANCE: f32 = 0.65;

/// Distance reported for any comparison that cannot produce a real one.
pub const NO_MATCH_DISTANCE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub is_match: bool,
    pub distance: f32,
}

impl MatchOutcome {
    const REJECT: MatchOutcome = MatchOutcome {
        is_match: false,
        distance: NO_MATCH_DISTANCE,
    };

    /// `(1 - distance) * 100`; only meaningful when `is_match`.
    pub fn confidence(&self) -> f32 {
        confidence(self.distance)
    }
}

pub fn confidence(distance: f32) -> f32 {
    (1.0 - distance) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PrimaryFailure {
    LengthMismatch(usize, usize),
    NonFinite,
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn primary_distance(probe: &[f32], stored: &[f32]) -> Result<f32, PrimaryFailure> {
    if probe.len() != stored.len() {
        return Err(PrimaryFailure::LengthMismatch(probe.len(), stored.len()));
    }
    let d = euclidean(probe, stored);
    if d.is_finite() {
        Ok(d)
    } else {
        Err(PrimaryFailure::NonFinite)
    }
}

/// Histogram comparison. Both vectors must be exactly [`EMBEDDING_DIM`] long.
pub fn match_fallback(probe: &[f32], stored: &[f32]) -> MatchOutcome {
    if probe.len() != EMBEDDING_DIM || stored.len() != EMBEDDING_DIM {
        tracing::debug!(
            probe = probe.len(),
            stored = stored.len(),
            "embedding length mismatch"
        );
        return MatchOutcome::REJECT;
    }
    let distance = euclidean(probe, stored);
    if !distance.is_finite() {
        return MatchOutcome::REJECT;
    }
    MatchOutcome {
        is_match: distance < FALLBACK_TOLERANCE,
        distance,
    }
}

/// Learned-embedding comparison, degrading to [`match_fallback`] on the same
/// vectors when a distance cannot be computed.
pub fn match_primary(probe: &[f32], stored: &[f32], tolerance: f32) -> MatchOutcome {
    match primary_distance(probe, stored) {
        Ok(distance) => MatchOutcome {
            is_match: distance <= tolerance,
            distance,
        },
        Err(failure) => {
            tracing::warn!(?failure, "primary comparison failed; using histogram comparison");
            match_fallback(probe, stored)
        }
    }
}

/// Compare a probe against a stored embedding.
///
/// `tolerance` applies to the primary regime only; the fallback regime uses
/// [`FALLBACK_TOLERANCE`].
pub fn match_embeddings(probe: &Embedding, stored: &Embedding, tolerance: f32) -> MatchOutcome {
    match (probe, stored) {
        (Embedding::Primary(p), Embedding::Primary(s)) => match_primary(p, s, tolerance),
        (Embedding::Fallback(p), Embedding::Fallback(s)) => match_fallback(p, s),
        _ => {
            tracing::warn!(
                probe = ?probe.kind(),
                stored = ?stored.kind(),
                "refusing to compare embeddings from different extraction paths"
            );
            MatchOutcome::REJECT
        }
    }
}
