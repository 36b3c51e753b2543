//! One capture session: camera → tiles → detections → retention → files → rows
//!
//! Image files are always written before database rows, and rows for a session
//! commit in a single transaction, so a photograph row implies its files exist.
//! A detector error on any tile aborts the session before anything is written.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use image::RgbImage;

use crate::capture::{Camera, OpenCamera, TileGrid, MAX_UPSCALE};
use crate::config::Config;
use crate::detector::{BirdDetector, Detection};
use crate::error::{Error, Result};
use crate::state::data::{photograph_file_name, tile_file_name};
use crate::state::{Database, TileDetection};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Tiling,
    Detecting,
    Deciding,
    Persisting,
    Done,
    Failed,
}

/// What a finished session left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Photograph retained and recorded
    Saved {
        photograph_id: i64,
        detections: usize,
    },
    /// Nothing worth keeping; no files, no rows
    NotSaved,
}

impl SessionOutcome {
    pub fn photograph_id(&self) -> Option<i64> {
        match self {
            SessionOutcome::Saved { photograph_id, .. } => Some(*photograph_id),
            SessionOutcome::NotSaved => None,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Saved {
                photograph_id,
                detections,
            } => write!(
                f,
                "Saved photograph {} with {} detection(s)",
                photograph_id, detections
            ),
            SessionOutcome::NotSaved => write!(f, "No birds detected"),
        }
    }
}

/// Runs capture sessions against one detector, file area and record store
pub struct CaptureSession<'a> {
    detector: &'a BirdDetector,
    grid: TileGrid,
    images_dir: PathBuf,
    database_path: PathBuf,
    keep_all: bool,
    min_confidence: f32,
    state: SessionState,
}

impl<'a> CaptureSession<'a> {
    pub fn new(detector: &'a BirdDetector, config: &Config, keep_all: bool) -> Self {
        Self {
            detector,
            grid: TileGrid::default(),
            images_dir: config.images_dir(),
            database_path: config.database_path(),
            keep_all,
            min_confidence: config.min_confidence,
            state: SessionState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run one session stamped with the current local time
    pub fn run<C: Camera + ?Sized>(&mut self, camera: &mut C) -> Result<SessionOutcome> {
        self.run_at(camera, Local::now().naive_local())
    }

    /// Run one session with an explicit capture time
    pub fn run_at<C: Camera + ?Sized>(
        &mut self,
        camera: &mut C,
        captured_at: NaiveDateTime,
    ) -> Result<SessionOutcome> {
        self.enter(SessionState::Idle);
        match self.execute(camera, captured_at) {
            Ok(outcome) => {
                self.enter(SessionState::Done);
                match outcome {
                    SessionOutcome::Saved { .. } => tracing::info!(%outcome, "Session complete"),
                    SessionOutcome::NotSaved => tracing::info!("No birds detected"),
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, during = ?self.state, "Capture session failed");
                self.enter(SessionState::Failed);
                Err(e)
            }
        }
    }

    fn execute<C: Camera + ?Sized>(
        &mut self,
        camera: &mut C,
        captured_at: NaiveDateTime,
    ) -> Result<SessionOutcome> {
        self.enter(SessionState::Capturing);
        let frame = {
            let mut camera = OpenCamera::acquire(camera)?;
            camera
                .capture()
                .ok_or_else(|| Error::CaptureFailed("camera returned no frame".to_string()))?
        };
        let factor = self.grid.upscale_factor(frame.width(), frame.height());
        if factor > MAX_UPSCALE {
            return Err(Error::CaptureFailed(format!(
                "{}x{} frame is too small to tile",
                frame.width(),
                frame.height()
            )));
        }

        self.enter(SessionState::Tiling);
        let (cropped, tiles) = self.grid.tile(&frame);

        self.enter(SessionState::Detecting);
        let per_tile = self.detect_tiles(&tiles)?;

        self.enter(SessionState::Deciding);
        if !self.keep_all && per_tile.iter().all(|d| d.is_empty()) {
            return Ok(SessionOutcome::NotSaved);
        }

        self.enter(SessionState::Persisting);
        self.persist(captured_at, &cropped, &tiles, &per_tile)
    }

    /// Detections for every tile, in tile index order
    fn detect_tiles(&self, tiles: &[RgbImage]) -> Result<Vec<Vec<Detection>>> {
        let mut per_tile = Vec::with_capacity(tiles.len());
        for (tile_index, tile) in tiles.iter().enumerate() {
            let detections = self
                .detector
                .detect(tile, self.min_confidence)
                .map_err(|e| Error::TileDetection {
                    tile_index,
                    message: e.to_string(),
                })?;
            for detection in &detections {
                tracing::info!(
                    tile_index,
                    confidence = format_args!("{:.2}", detection.confidence),
                    "Bird detected"
                );
            }
            per_tile.push(detections);
        }
        Ok(per_tile)
    }

    fn persist(
        &self,
        captured_at: NaiveDateTime,
        cropped: &RgbImage,
        tiles: &[RgbImage],
        per_tile: &[Vec<Detection>],
    ) -> Result<SessionOutcome> {
        fs::create_dir_all(&self.images_dir)?;
        // Opened before any file write so an unreachable store leaves nothing behind
        let db = Database::open(&self.database_path)?;

        let base = unique_base_name(&self.images_dir, captured_at);
        let image_file = photograph_file_name(&base);
        cropped.save(self.images_dir.join(&image_file))?;

        for (tile_index, (tile, detections)) in tiles.iter().zip(per_tile).enumerate() {
            if self.keep_all || !detections.is_empty() {
                tile.save(self.images_dir.join(tile_file_name(&base, tile_index as u32)))?;
            }
        }

        let flattened: Vec<TileDetection> = per_tile
            .iter()
            .enumerate()
            .flat_map(|(tile_index, detections)| {
                detections.iter().map(move |d| TileDetection {
                    tile_index: tile_index as u32,
                    confidence: d.confidence,
                })
            })
            .collect();

        let photograph_id = db.record_session(captured_at, &image_file, self.keep_all, &flattened)?;
        tracing::info!(
            image = %image_file,
            photograph_id,
            detections = flattened.len(),
            "Saved photograph"
        );

        Ok(SessionOutcome::Saved {
            photograph_id,
            detections: flattened.len(),
        })
    }

    fn enter(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}

/// `%Y%m%d%H%M%S` of the capture time, suffixed `-1`, `-2`, ... if already taken
fn unique_base_name(images_dir: &Path, captured_at: NaiveDateTime) -> String {
    let stamp = captured_at.format("%Y%m%d%H%M%S").to_string();
    if !images_dir.join(photograph_file_name(&stamp)).exists() {
        return stamp;
    }

    let mut n = 1;
    loop {
        let candidate = format!("{}-{}", stamp, n);
        if !images_dir.join(photograph_file_name(&candidate)).exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Load the detector, then run one session on `camera`.
///
/// The model is resolved first; if it is unavailable the camera is never opened.
pub fn shoot<C: Camera + ?Sized>(
    config: &Config,
    camera: &mut C,
    keep_all: bool,
) -> Result<SessionOutcome> {
    let detector = BirdDetector::from_config(config)?;
    CaptureSession::new(&detector, config, keep_all).run(camera)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Camera that hands out a fixed frame and counts open/close calls
    pub struct ScriptedCamera {
        pub frame: Option<RgbImage>,
        pub available: bool,
        pub opens: u32,
        pub closes: u32,
    }

    impl ScriptedCamera {
        pub fn with_frame(frame: RgbImage) -> Self {
            Self {
                frame: Some(frame),
                available: true,
                opens: 0,
                closes: 0,
            }
        }
    }

    impl Camera for ScriptedCamera {
        fn open(&mut self) -> bool {
            self.opens += 1;
            self.available
        }

        fn capture(&mut self) -> Option<RgbImage> {
            self.frame.clone()
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }
}
