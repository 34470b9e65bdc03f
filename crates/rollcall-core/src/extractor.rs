//! Per-face embedding extraction with a deterministic fallback.

use crate::histogram;
use crate::models::FaceEncoder;
use crate::types::Embedding;
use image::{DynamicImage, ImageReader, ImageResult, RgbImage};
use std::path::Path;

/// Decode an image file to RGB. `None` when the file is missing or unreadable.
///
/// The format is sniffed from the file contents; the extension is only a hint.
pub fn load_rgb(path: &Path) -> Option<RgbImage> {
    match decode(path) {
        Ok(img) => Some(img.to_rgb8()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read image");
            None
        }
    }
}

fn decode(path: &Path) -> ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Produces one embedding per detected face.
///
/// With a learned encoder, faces are localised and embedded individually.
/// Without one, or when it fails on a given image, the whole frame is reduced
/// to a single HSV histogram, regardless of how many people are visible.
pub struct EmbeddingExtractor {
    encoder: Option<Box<dyn FaceEncoder>>,
}

impl EmbeddingExtractor {
    pub fn new(encoder: Option<Box<dyn FaceEncoder>>) -> Self {
        if encoder.is_none() {
            tracing::warn!(
                "no face encoder configured; using colour histogram embeddings"
            );
        }
        Self { encoder }
    }

    /// Histogram-only extractor.
    pub fn fallback_only() -> Self {
        Self { encoder: None }
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    /// Extract embeddings from an image file. Unreadable input yields an empty list.
    pub fn extract(&mut self, path: &Path) -> Vec<Embedding> {
        match load_rgb(path) {
            Some(image) => self.extract_image(&image),
            None => Vec::new(),
        }
    }

    pub fn extract_image(&mut self, image: &RgbImage) -> Vec<Embedding> {
        let Some(encoder) = self.encoder.as_mut() else {
            return vec![fallback_embedding(image)];
        };

        match encoder.encode(image) {
            Ok(vectors) => {
                tracing::debug!(faces = vectors.len(), "primary extraction");
                vectors.into_iter().map(Embedding::Primary).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "face encoder failed; switching to histogram fallback");
                vec![fallback_embedding(image)]
            }
        }
    }
}

pub fn fallback_embedding(image: &RgbImage) -> Embedding {
    Embedding::Fallback(histogram::hsv_histogram(image))
}
