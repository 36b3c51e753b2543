//! Runtime configuration
//!
//! Values come from the environment (optionally via a `.env` file) with
//! defaults that match a Raspberry Pi install: everything lives under
//! `~/.pisky` unless `PISKY_DATA_DIR` says otherwise.

use std::path::PathBuf;

use crate::detector::DEFAULT_MIN_CONFIDENCE;
use crate::error::{Error, Result};

/// Where the detection model is fetched from when it is not on disk yet.
///
/// YOLOv4 from the ONNX model zoo: raw detection heads, no control-flow operators.
pub const DEFAULT_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/object_detection_segmentation/yolov4/model/yolov4.onnx";

/// File name of the model inside `models/`
pub const MODEL_FILENAME: &str = "yolov4.onnx";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for images, database and models
    pub data_dir: PathBuf,
    /// Model download URL
    pub model_url: String,
    /// Persistence threshold for bird detections
    pub min_confidence: f32,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match lookup("PISKY_DATA_DIR").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let model_url = lookup("PISKY_MODEL_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL_URL.to_string());

        let min_confidence = match lookup("PISKY_MIN_CONFIDENCE") {
            Some(value) => value
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|c| (0.0..=1.0).contains(c))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "PISKY_MIN_CONFIDENCE must be in [0, 1], got '{}'",
                        value
                    ))
                })?,
            None => DEFAULT_MIN_CONFIDENCE,
        };

        Ok(Self {
            data_dir,
            model_url,
            min_confidence,
        })
    }

    /// Directory holding photograph and tile JPEGs
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// SQLite record store
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("detections.db")
    }

    /// Local model file
    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join("models").join(MODEL_FILENAME)
    }
}

/// `~/.pisky`
fn default_data_dir() -> Result<PathBuf> {
    let mut path = dirs::home_dir()
        .ok_or_else(|| Error::Config("could not determine home directory".to_string()))?;
    path.push(".pisky");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_paths_derive_from_data_dir() {
        let config = Config::from_lookup(lookup(&[("PISKY_DATA_DIR", "/srv/pisky")])).unwrap();

        assert_eq!(config.images_dir(), PathBuf::from("/srv/pisky/images"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/pisky/detections.db"));
        assert_eq!(
            config.model_path(),
            PathBuf::from("/srv/pisky/models/yolov4.onnx")
        );
        assert_eq!(config.model_url, DEFAULT_MODEL_URL);
        assert_eq!(config.min_confidence, DEFAULT_MIN_CONFIDENCE);
    }

    #[test]
    fn test_model_url_override() {
        let config = Config::from_lookup(lookup(&[
            ("PISKY_DATA_DIR", "/tmp/p"),
            ("PISKY_MODEL_URL", "http://mirror.local/models/yolov4.zip"),
        ]))
        .unwrap();

        assert_eq!(config.model_url, "http://mirror.local/models/yolov4.zip");
        assert!(config.model_path().ends_with("models/yolov4.onnx"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        assert!(Config::from_lookup(lookup(&[
            ("PISKY_DATA_DIR", "/tmp/p"),
            ("PISKY_MIN_CONFIDENCE", "1.5"),
        ]))
        .is_err());
    }
}
