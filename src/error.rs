//! Error handling for the capture pipeline and record store

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera device absent or failed to open
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Camera opened but returned no frame
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Detector could not be initialized (missing weights, bad model, runtime error)
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference backend failed on a single call
    #[error("Inference error: {0}")]
    Inference(String),

    /// Inference failure attributed to one tile of a capture session
    #[error("Detection failed on tile {tile_index:02}: {message}")]
    TileDetection { tile_index: usize, message: String },

    /// Record store could not open or commit
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Model download error
    #[error("Download error: {0}")]
    Download(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::CameraUnavailable(_) => "CAMERA_UNAVAILABLE",
            Error::CaptureFailed(_) => "CAPTURE_FAILED",
            Error::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            Error::Inference(_) | Error::TileDetection { .. } => "INFERENCE_ERROR",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::Io(_) => "IO_ERROR",
            Error::Image(_) => "IMAGE_ERROR",
            Error::Download(_) => "DOWNLOAD_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}
