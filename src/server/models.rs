//! API response bodies

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::state::PhotographWithDetections;

/// One detection with the URL of its tile image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionView {
    pub tile_index: u32,
    pub confidence: f32,
    pub tile_url: String,
}

/// A photograph with links to its images
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotographDetail {
    pub photograph_id: i64,
    pub captured_at: NaiveDateTime,
    pub image_url: String,
    pub keep_all: bool,
    pub detections: Vec<DetectionView>,
}

/// Result of a capture trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShootResponse {
    pub photograph_id: Option<i64>,
    pub message: String,
}

impl From<PhotographWithDetections> for PhotographDetail {
    fn from(found: PhotographWithDetections) -> Self {
        let photo = found.photograph;
        let detections = found
            .detections
            .iter()
            .map(|d| DetectionView {
                tile_index: d.tile_index,
                confidence: d.confidence,
                tile_url: format!("/images/{}", photo.tile_image_path(d.tile_index)),
            })
            .collect();

        Self {
            photograph_id: photo.id,
            captured_at: photo.captured_at,
            image_url: format!("/images/{}", photo.image_path),
            keep_all: photo.keep_all,
            detections,
        }
    }
}
