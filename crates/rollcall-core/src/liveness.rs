//! Single-frame liveness gate.
//!
//! # Limitations
//!
//! A still image cannot distinguish a live face from a printed photo or a
//! screen replay. With a landmark model present this gate only rejects frames
//! in which no face can be located. Without one it is a permissive mock that
//! passes every readable frame with score [`MOCK_SCORE`]; callers that enforce
//! it as a hard gate get no anti-spoofing guarantee in that mode.

use crate::extractor::load_rgb;
use crate::models::LandmarkModel;
use crate::types::Liveness;
use image::RgbImage;
use std::path::Path;

/// Score reported when a frame passes.
pub const MOCK_SCORE: f32 = 0.95;

const REJECTED: Liveness = Liveness {
    is_live: false,
    score: 0.0,
};
const PASSED: Liveness = Liveness {
    is_live: true,
    score: MOCK_SCORE,
};

pub struct LivenessGate {
    model: Option<Box<dyn LandmarkModel>>,
}

impl LivenessGate {
    pub fn new(model: Option<Box<dyn LandmarkModel>>) -> Self {
        if model.is_none() {
            tracing::warn!(
                "no landmark model; liveness runs in degraded-security (mocked) mode"
            );
        }
        Self { model }
    }

    pub fn mocked() -> Self {
        Self { model: None }
    }

    /// Whether a real landmark model backs this gate.
    pub fn is_model_backed(&self) -> bool {
        self.model.is_some()
    }

    pub fn check(&mut self, path: &Path) -> Liveness {
        match load_rgb(path) {
            Some(image) => self.check_image(&image),
            None => REJECTED,
        }
    }

    pub fn check_image(&mut self, image: &RgbImage) -> Liveness {
        let Some(model) = self.model.as_mut() else {
            return PASSED;
        };

        match model.locate(image) {
            Ok(Some(confidence)) => {
                tracing::debug!(confidence, "liveness: landmarks located");
                PASSED
            }
            Ok(None) => {
                tracing::info!("liveness: no facial landmarks detected");
                REJECTED
            }
            Err(e) => {
                tracing::warn!(error = %e, "liveness model failed; passing frame in degraded mode");
                PASSED
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ModelError;

    pub(crate) struct FixedLandmarks(pub Result<Option<f32>, String>);

    impl LandmarkModel for FixedLandmarks {
        fn locate(&mut self, _image: &RgbImage) -> Result<Option<f32>, ModelError> {
            self.0.clone().map_err(ModelError::Other)
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb([200, 150, 120]))
    }

    #[test]
    fn test_mocked_gate_passes() {
        let live = LivenessGate::mocked().check_image(&frame());
        assert_eq!((live.is_live, live.score), (true, 0.95));
    }

    #[test]
    fn test_no_landmarks_rejects() {
        let mut gate = LivenessGate::new(Some(Box::new(FixedLandmarks(Ok(None)))));
        let live = gate.check_image(&frame());
        assert_eq!((live.is_live, live.score), (false, 0.0));
    }

    #[test]
    fn test_landmarks_found_passes() {
        let mut gate = LivenessGate::new(Some(Box::new(FixedLandmarks(Ok(Some(0.81))))));
        assert!(gate.check_image(&frame()).is_live);
    }

    #[test]
    fn test_model_error_degrades_to_pass() {
        let mut gate = LivenessGate::new(Some(Box::new(FixedLandmarks(Err("boom".into())))));
        assert_eq!(gate.check_image(&frame()), PASSED);
    }

    #[test]
    fn test_unreadable_path_rejects() {
        let live = LivenessGate::mocked().check(Path::new("/nonexistent.png"));
        assert!(!live.is_live);
        assert_eq!(live.score, 0.0);
    }
}
