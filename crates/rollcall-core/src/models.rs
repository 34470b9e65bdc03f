//! Seams between the matching engine and the learned models.
//!
//! The engine only needs two capabilities: per-face embeddings and "is there a
//! face with landmarks". Both have ONNX-backed implementations here.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "face_embed_128.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Learned face detection + embedding.
pub trait FaceEncoder: Send {
    /// One vector per detected face, in detection order.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Facial landmark localisation used by the liveness gate.
pub trait LandmarkModel: Send {
    /// Confidence of the best face that carried landmarks, or `None`.
    fn locate(&mut self, image: &RgbImage) -> Result<Option<f32>, ModelError>;
}

pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            detector: FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?,
            recognizer: FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Vec<f32>>, ModelError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "detector pass complete");
        faces
            .iter()
            .filter(|f| f.landmarks.is_some())
            .map(|f| Ok(self.recognizer.embed(image, f)?))
            .collect()
    }
}

pub struct OnnxLandmarkModel {
    detector: FaceDetector,
}

impl OnnxLandmarkModel {
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            detector: FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?,
        })
    }
}

impl LandmarkModel for OnnxLandmarkModel {
    fn locate(&mut self, image: &RgbImage) -> Result<Option<f32>, ModelError> {
        let faces = self.detector.detect(image)?;
        let best = faces.iter().find(|f| f.landmarks.is_some());
        Ok(best.map(|f| f.confidence))
    }
}

/// Load both models from `model_dir`, logging and returning `None` for any
/// that cannot be initialised.
pub fn load_models(model_dir: &Path) -> (Option<OnnxFaceEncoder>, Option<OnnxLandmarkModel>) {
    let encoder = match OnnxFaceEncoder::load(model_dir) {
        Ok(encoder) => Some(encoder),
        Err(e) => {
            tracing::warn!(error = %e, "face encoder unavailable; histogram fallback active");
            None
        }
    };
    let landmarks = match OnnxLandmarkModel::load(model_dir) {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::warn!(error = %e, "landmark model unavailable; liveness is mocked");
            None
        }
    };
    (encoder, landmarks)
}
