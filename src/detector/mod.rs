//! Bird detection over single tiles
//!
//! `BirdDetector` wraps the loaded inference runtime and reduces its output to
//! the target class. The runtime itself sits behind the `InferenceBackend`
//! trait (backend.rs); model files are resolved by model.rs.

pub mod backend;
pub mod model;

use std::path::Path;

use image::RgbImage;

use crate::config::Config;
use crate::error::Result;

pub use backend::{load_backend, InferenceBackend};
#[cfg(test)]
use backend::RawDetection;

/// Default persistence threshold
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.33;

/// Default threshold for the all-classes diagnostic
pub const DEFAULT_DIAGNOSTIC_CONFIDENCE: f32 = 0.5;

/// "bird" in the 80-class COCO ordering the model is trained on
pub const BIRD_CLASS_ID: i64 = 14;

/// A target-class detection on one tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub confidence: f32,
    /// top, left, bottom, right; normalized to the tile
    pub bbox: [f32; 4],
}

/// Detector for a single class, holding one loaded model for its whole lifetime
pub struct BirdDetector {
    backend: Box<dyn InferenceBackend>,
    target_class: i64,
}

impl BirdDetector {
    pub fn new(backend: Box<dyn InferenceBackend>, target_class: i64) -> Self {
        Self {
            backend,
            target_class,
        }
    }

    /// Download the model if needed and load it.
    ///
    /// Any failure here is `ModelUnavailable`; callers load the detector
    /// before touching the camera.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = model::ensure_model(config).map_err(model::unavailable)?;
        Self::load(&path)
    }

    /// Load a model file that is already on disk
    pub fn load(path: &Path) -> Result<Self> {
        let backend = load_backend(path)?;
        tracing::info!(model = %path.display(), "Bird detector loaded");
        Ok(Self::new(backend, BIRD_CLASS_ID))
    }

    pub fn target_class(&self) -> i64 {
        self.target_class
    }

    /// Target-class detections at or above `min_confidence`, in backend output order.
    pub fn detect(&self, tile: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>> {
        let raw = self.backend.infer(tile)?;
        Ok(raw
            .into_iter()
            .filter(|d| d.class_id == self.target_class && d.confidence >= min_confidence)
            .map(|d| Detection {
                confidence: d.confidence,
                bbox: d.bbox,
            })
            .collect())
    }

    /// `(class_id, confidence)` for every class at or above `min_confidence`.
    pub fn detect_all(&self, tile: &RgbImage, min_confidence: f32) -> Result<Vec<(i64, f32)>> {
        let raw = self.backend.infer(tile)?;
        Ok(raw
            .into_iter()
            .filter(|d| d.confidence >= min_confidence)
            .map(|d| (d.class_id, d.confidence))
            .collect())
    }
}

impl std::fmt::Debug for BirdDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BirdDetector")
            .field("target_class", &self.target_class)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::Error;

    /// Backend that replays a fixed output for every tile
    pub struct FixedBackend(pub Vec<RawDetection>);

    impl InferenceBackend for FixedBackend {
        fn infer(&self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    /// Backend whose bird confidence is the red channel of the tile's top-left pixel / 100.
    ///
    /// A red value of 0 means no detection at all.
    pub struct PixelScoreBackend {
        pub class_id: i64,
    }

    impl InferenceBackend for PixelScoreBackend {
        fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
            let red = image.get_pixel(0, 0)[0];
            if red == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![RawDetection {
                class_id: self.class_id,
                confidence: red as f32 / 100.0,
                bbox: [0.1, 0.1, 0.9, 0.9],
            }])
        }
    }

    /// Backend that fails on tiles whose top-left pixel is pure blue
    pub struct FailOnBlueBackend;

    impl InferenceBackend for FailOnBlueBackend {
        fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
            if image.get_pixel(0, 0).0 == [0, 0, 255] {
                return Err(Error::Inference("tensor shape mismatch".to_string()));
            }
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedBackend;
    use super::*;

    fn raw(class_id: i64, confidence: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: [0.0, 0.0, 1.0, 1.0],
        }
    }

    fn detector(outputs: Vec<RawDetection>) -> BirdDetector {
        BirdDetector::new(Box::new(FixedBackend(outputs)), BIRD_CLASS_ID)
    }

    #[test]
    fn test_detect_filters_class_and_threshold() {
        let detector = detector(vec![
            raw(1, 0.9),
            raw(BIRD_CLASS_ID, 0.2),
            raw(BIRD_CLASS_ID, 0.33),
            raw(BIRD_CLASS_ID, 0.7),
        ]);
        let tile = RgbImage::new(300, 300);

        let detections = detector.detect(&tile, DEFAULT_MIN_CONFIDENCE).unwrap();
        let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();

        // Threshold is inclusive and model order is kept
        assert_eq!(confidences, vec![0.33, 0.7]);
    }

    #[test]
    fn test_zero_threshold_keeps_every_candidate() {
        let detector = detector(vec![
            raw(BIRD_CLASS_ID, 0.01),
            raw(BIRD_CLASS_ID, 0.0),
            raw(3, 0.5),
        ]);
        let tile = RgbImage::new(300, 300);

        assert_eq!(detector.detect(&tile, 0.0).unwrap().len(), 2);
    }

    #[test]
    fn test_detect_all_reports_every_class() {
        let detector = detector(vec![raw(1, 0.9), raw(BIRD_CLASS_ID, 0.6), raw(62, 0.4)]);
        let tile = RgbImage::new(300, 300);

        assert_eq!(
            detector.detect_all(&tile, DEFAULT_DIAGNOSTIC_CONFIDENCE).unwrap(),
            vec![(1, 0.9), (BIRD_CLASS_ID, 0.6)]
        );
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = BirdDetector::load(&dir.path().join("nope.onnx"));

        assert!(matches!(result, Err(crate::error::Error::ModelUnavailable(_))));
    }
}
