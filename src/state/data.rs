//! Shared data structures for the record store
//!
//! These structs represent the data model that flows between
//! the database layer, the capture session and the HTTP API.

use chrono::NaiveDateTime;
use serde::Serialize;

/// A retained capture, as stored
#[derive(Debug, Clone, PartialEq)]
pub struct Photograph {
    /// Unique database ID
    pub id: i64,
    /// Local capture time
    pub captured_at: NaiveDateTime,
    /// File name relative to the images directory (e.g. "20250101120000.jpg")
    pub image_path: String,
    /// Kept regardless of detections
    pub keep_all: bool,
}

/// One logged bird detection on one tile of a photograph
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub id: i64,
    pub photograph_id: i64,
    /// Row-major tile index
    pub tile_index: u32,
    pub confidence: f32,
}

/// A detection found during a session, before it has an id
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileDetection {
    pub tile_index: u32,
    pub confidence: f32,
}

/// Row of the recent-photographs listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotographSummary {
    pub photograph_id: i64,
    pub captured_at: NaiveDateTime,
    pub image_path: String,
    pub keep_all: bool,
    pub detection_count: i64,
}

/// A photograph with its detections ordered by tile index
#[derive(Debug, Clone, PartialEq)]
pub struct PhotographWithDetections {
    pub photograph: Photograph,
    pub detections: Vec<DetectionRecord>,
}

/// Aggregate counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_photographs: i64,
    pub total_detections: i64,
}

impl Photograph {
    /// File name of a tile image belonging to this photograph
    pub fn tile_image_path(&self, tile_index: u32) -> String {
        tile_file_name(base_name(&self.image_path), tile_index)
    }
}

/// Image path without its extension
pub fn base_name(image_path: &str) -> &str {
    match image_path.rsplit_once('.') {
        Some((base, _)) => base,
        None => image_path,
    }
}

/// `{base}.jpg`
pub fn photograph_file_name(base: &str) -> String {
    format!("{}.jpg", base)
}

/// `{base}_{tile_index:02}.jpg`
pub fn tile_file_name(base: &str, tile_index: u32) -> String {
    format!("{}_{:02}.jpg", base, tile_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_names_follow_photograph() {
        let photo = Photograph {
            id: 1,
            captured_at: NaiveDateTime::default(),
            image_path: "20250101120000.jpg".to_string(),
            keep_all: false,
        };

        assert_eq!(photo.tile_image_path(7), "20250101120000_07.jpg");
        assert_eq!(photo.tile_image_path(17), "20250101120000_17.jpg");
    }

    #[test]
    fn test_base_name_handles_suffixes() {
        assert_eq!(base_name("20250101120000-1.jpg"), "20250101120000-1");
        assert_eq!(base_name("noext"), "noext");
        assert_eq!(photograph_file_name("20250101120000"), "20250101120000.jpg");
    }
}
