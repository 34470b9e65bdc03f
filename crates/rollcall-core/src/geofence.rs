//! Great-circle radius check.
//!
//! Advisory only: answers whether a point lies within a radius. Whether a
//! violation blocks anything is decided by the caller's policy.

use serde::{Deserialize, Serialize};

/// Mean earth radius in metres (spherical approximation).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in metres between two points in decimal degrees.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * a.sqrt().min(1.0).asin() * EARTH_RADIUS_M
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceCheck {
    pub valid: bool,
    /// `None` when the user position was incomplete and no distance was computed.
    pub distance_m: Option<f64>,
}

/// `valid` iff the user is at most `radius_m` from the target.
/// A missing user coordinate is invalid without computing a distance.
pub fn is_within_radius(
    user_lat: Option<f64>,
    user_lng: Option<f64>,
    target_lat: f64,
    target_lng: f64,
    radius_m: f64,
) -> GeofenceCheck {
    let (Some(lat), Some(lng)) = (user_lat, user_lng) else {
        return GeofenceCheck {
            valid: false,
            distance_m: None,
        };
    };
    let distance = haversine_m(lat, lng, target_lat, target_lng);
    GeofenceCheck {
        valid: distance <= radius_m,
        distance_m: Some(distance),
    }
}

/// Reference site with an allowed radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoSite {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
}

impl GeoSite {
    pub fn check(&self, user_lat: Option<f64>, user_lng: Option<f64>) -> GeofenceCheck {
        is_within_radius(user_lat, user_lng, self.lat, self.lng, self.radius_m)
    }
}

impl Default for GeoSite {
    fn default() -> Self {
        Self {
            lat: 12.9716,
            lng: 77.5946,
            radius_m: 200.0,
        }
    }
}
