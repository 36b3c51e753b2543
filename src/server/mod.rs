//! HTTP API
//!
//! ## Responsibilities
//!
//! - Read endpoints over the record store
//! - In-process capture trigger
//! - Serving saved images

mod error;
mod models;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::capture::Camera;
use crate::config::Config;
use crate::detector::BirdDetector;

/// The camera plus the detector once it has been loaded.
///
/// Held behind one mutex: capture sessions never overlap, and the model is
/// loaded by the first session that needs it and reused afterwards.
pub struct CaptureResources {
    pub camera: Box<dyn Camera + Send>,
    pub detector: Option<Arc<BirdDetector>>,
}

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub capture: Arc<Mutex<CaptureResources>>,
}

impl AppState {
    pub fn new(config: Config, camera: Box<dyn Camera + Send>) -> Self {
        Self {
            config: Arc::new(config),
            capture: Arc::new(Mutex::new(CaptureResources {
                camera,
                detector: None,
            })),
        }
    }

    /// Use an already-loaded detector instead of loading one on first capture
    #[cfg(test)]
    pub fn with_detector(self, detector: Arc<BirdDetector>) -> Self {
        if let Ok(mut resources) = self.capture.try_lock() {
            resources.detector = Some(detector);
        }
        self
    }
}

/// Bind and serve the API until the process is stopped
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let images_dir = state.config.images_dir();
    tokio::fs::create_dir_all(&images_dir).await?;

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        images = %images_dir.display(),
        "API server listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
