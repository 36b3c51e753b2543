//! Image acquisition
//!
//! - Camera capability and the ffmpeg-backed device (camera.rs)
//! - Frame tiling geometry (tiler.rs)

pub mod camera;
pub mod tiler;

pub use camera::{list_cameras, Camera, FfmpegCamera, OpenCamera};
pub use tiler::{TileGrid, MAX_UPSCALE};
