//! API Routes

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::models::{PhotographDetail, ShootResponse};
use super::AppState;
use crate::config::Config;
use crate::detector::BirdDetector;
use crate::session::{CaptureSession, SessionOutcome};
use crate::state::{Database, PhotographSummary, Stats};

const DEFAULT_LIMIT: u32 = 50;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://localhost:3000"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let images = ServeDir::new(state.config.images_dir());

    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/photographs", get(list_photographs))
        .route("/api/photographs/:id", get(get_photograph))
        .route("/api/stats", get(get_stats))
        .route("/api/shoot", post(trigger_shoot))
        .nest_service("/images", images)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

/// List recent photographs with detection counts
async fn list_photographs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PhotographSummary>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let rows = with_store(&state.config, move |db| db.get_recent_photographs(limit)).await?;
    Ok(Json(rows))
}

/// Get a photograph with its detections
async fn get_photograph(
    State(state): State<AppState>,
    Path(photograph_id): Path<i64>,
) -> Result<Json<PhotographDetail>, ApiError> {
    let found = with_store(&state.config, move |db| db.get_photograph(photograph_id)).await?;
    match found {
        Some(found) => Ok(Json(PhotographDetail::from(found))),
        None => Err(ApiError::NotFound("Photograph not found".to_string())),
    }
}

/// Get summary statistics
async fn get_stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let stats = with_store(&state.config, |db| db.get_stats()).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ShootParams {
    pub keep_all: Option<bool>,
}

/// Run a capture session in-process (keep_all unless told otherwise)
async fn trigger_shoot(
    State(state): State<AppState>,
    Query(params): Query<ShootParams>,
) -> Result<Json<ShootResponse>, ApiError> {
    let keep_all = params.keep_all.unwrap_or(true);
    let config = state.config.clone();

    // Waits for any session already in flight
    let mut resources = state.capture.clone().lock_owned().await;

    let result = tokio::task::spawn_blocking(move || {
        let detector = match resources.detector.clone() {
            Some(detector) => detector,
            None => {
                let detector = Arc::new(BirdDetector::from_config(&config)?);
                resources.detector = Some(detector.clone());
                detector
            }
        };
        CaptureSession::new(&detector, &config, keep_all).run(resources.camera.as_mut())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("capture task failed: {}", e)))?;

    let response = match result {
        Ok(SessionOutcome::Saved { photograph_id, .. }) => ShootResponse {
            photograph_id: Some(photograph_id),
            message: "Capture complete".to_string(),
        },
        Ok(SessionOutcome::NotSaved) => ShootResponse {
            photograph_id: None,
            message: "Capture complete but no photograph saved".to_string(),
        },
        Err(e) => ShootResponse {
            photograph_id: None,
            message: format!("Capture failed: {}", e),
        },
    };
    Ok(Json(response))
}

/// Open the record store on a blocking thread for the duration of `f`
async fn with_store<T, F>(config: &Config, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> crate::error::Result<T> + Send + 'static,
{
    let path = config.database_path();
    tokio::task::spawn_blocking(move || {
        let db = Database::open(&path)?;
        f(&db)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("store task failed: {}", e)))?
    .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::testing::PixelScoreBackend;
    use crate::session::testing::ScriptedCamera;
    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};

    fn test_state(dir: &std::path::Path, frame: RgbImage) -> AppState {
        let config = Config {
            data_dir: dir.to_path_buf(),
            model_url: "http://127.0.0.1:9/model.onnx".to_string(),
            min_confidence: 0.33,
        };
        AppState::new(config, Box::new(ScriptedCamera::with_frame(frame)))
    }

    fn seed(state: &AppState) -> i64 {
        let db = Database::open(&state.config.database_path()).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 5, 17).unwrap();
        db.log_photograph(day.and_hms_opt(6, 0, 0).unwrap(), "20250517060000.jpg", true)
            .unwrap();
        db.record_session(
            day.and_hms_opt(9, 30, 0).unwrap(),
            "20250517093000.jpg",
            false,
            &[
                crate::state::TileDetection { tile_index: 12, confidence: 0.75 },
                crate::state::TileDetection { tile_index: 4, confidence: 0.5 },
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), RgbImage::new(1, 1));
        let latest = seed(&state);

        let Json(rows) = list_photographs(State(state.clone()), Query(ListParams { limit: None }))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].photograph_id, latest);
        assert_eq!(rows[0].detection_count, 2);

        let Json(one) = list_photographs(State(state.clone()), Query(ListParams { limit: Some(1) }))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);

        let Json(stats) = get_stats(State(state)).await.unwrap();
        assert_eq!(stats.total_photographs, 2);
        assert_eq!(stats.total_detections, 2);
    }

    #[tokio::test]
    async fn test_photograph_detail_links_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), RgbImage::new(1, 1));
        let id = seed(&state);

        let Json(detail) = get_photograph(State(state), Path(id)).await.unwrap();
        assert_eq!(detail.image_url, "/images/20250517093000.jpg");
        let urls: Vec<&str> = detail.detections.iter().map(|d| d.tile_url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["/images/20250517093000_04.jpg", "/images/20250517093000_12.jpg"]
        );
    }

    #[tokio::test]
    async fn test_unknown_photograph_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), RgbImage::new(1, 1));

        let result = get_photograph(State(state), Path(404)).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_shoot_runs_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let frame = RgbImage::from_pixel(1920, 1080, Rgb([10, 0, 0]));
        let detector = Arc::new(BirdDetector::new(
            Box::new(PixelScoreBackend {
                class_id: crate::detector::BIRD_CLASS_ID,
            }),
            crate::detector::BIRD_CLASS_ID,
        ));
        let state = test_state(dir.path(), frame).with_detector(detector);

        let Json(kept) = trigger_shoot(State(state.clone()), Query(ShootParams { keep_all: None }))
            .await
            .unwrap();
        assert!(kept.photograph_id.is_some());
        assert_eq!(kept.message, "Capture complete");

        let Json(skipped) =
            trigger_shoot(State(state.clone()), Query(ShootParams { keep_all: Some(false) }))
                .await
                .unwrap();
        assert_eq!(skipped.photograph_id, None);
        assert_eq!(skipped.message, "Capture complete but no photograph saved");

        let Json(stats) = get_stats(State(state)).await.unwrap();
        assert_eq!(stats.total_photographs, 1);
    }

    #[tokio::test]
    async fn test_shoot_reports_model_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), RgbImage::new(1, 1));

        let Json(response) = trigger_shoot(State(state), Query(ShootParams { keep_all: None }))
            .await
            .unwrap();
        assert_eq!(response.photograph_id, None);
        assert!(response.message.starts_with("Capture failed: Model unavailable"));
    }
}
