//! Camera capability and the ffmpeg-backed implementation
//!
//! A still frame is grabbed by running `ffmpeg` against the video device for a
//! single frame and decoding the MJPEG it writes to stdout.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::RgbImage;

use crate::error::{Error, Result};

/// Resolution requested from the device
const REQUESTED_WIDTH: u32 = 1920;
const REQUESTED_HEIGHT: u32 = 1080;

/// A camera that can be opened, asked for one frame, and closed.
pub trait Camera {
    /// Acquire the device. Returns false when the device is absent or unusable.
    fn open(&mut self) -> bool;

    /// Grab one frame, or `None` if the device produced nothing.
    fn capture(&mut self) -> Option<RgbImage>;

    /// Release the device. Must be safe to call when not open.
    fn close(&mut self);
}

/// An opened camera, closed again when dropped.
pub struct OpenCamera<'a, C: Camera + ?Sized> {
    camera: &'a mut C,
}

impl<'a, C: Camera + ?Sized> OpenCamera<'a, C> {
    /// Open the camera, failing with `CameraUnavailable` if it won't open.
    pub fn acquire(camera: &'a mut C) -> Result<Self> {
        if !camera.open() {
            // Some devices half-open; release whatever was taken.
            camera.close();
            return Err(Error::CameraUnavailable(
                "camera could not be opened".to_string(),
            ));
        }
        Ok(Self { camera })
    }

    /// Grab one frame from the opened camera
    pub fn capture(&mut self) -> Option<RgbImage> {
        self.camera.capture()
    }
}

impl<C: Camera + ?Sized> Drop for OpenCamera<'_, C> {
    fn drop(&mut self) {
        self.camera.close();
        tracing::debug!("Camera released");
    }
}

/// Camera at `/dev/video{index}` (Linux) or AVFoundation index (macOS), read through ffmpeg.
#[derive(Debug)]
pub struct FfmpegCamera {
    index: u32,
    opened: bool,
}

impl FfmpegCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            opened: false,
        }
    }

    fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/video{}", self.index))
    }

    /// ffmpeg input arguments for this platform
    fn input_args(&self) -> Vec<String> {
        let size = format!("{}x{}", REQUESTED_WIDTH, REQUESTED_HEIGHT);
        if cfg!(target_os = "macos") {
            vec![
                "-f".into(),
                "avfoundation".into(),
                "-framerate".into(),
                "30".into(),
                "-video_size".into(),
                size,
                "-i".into(),
                format!("{}", self.index),
            ]
        } else {
            vec![
                "-f".into(),
                "v4l2".into(),
                "-video_size".into(),
                size,
                "-i".into(),
                self.device_path().to_string_lossy().to_string(),
            ]
        }
    }

    /// Run ffmpeg for exactly one frame and return the JPEG bytes
    fn grab_jpeg(&self) -> Result<Vec<u8>> {
        let output = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-y"])
            .args(self.input_args())
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::CaptureFailed(format!("ffmpeg spawn failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CaptureFailed(format!("ffmpeg failed: {}", stderr.trim())));
        }
        if output.stdout.is_empty() {
            return Err(Error::CaptureFailed("ffmpeg returned empty output".to_string()));
        }

        Ok(output.stdout)
    }
}

impl Camera for FfmpegCamera {
    fn open(&mut self) -> bool {
        if cfg!(target_os = "linux") && !self.device_path().exists() {
            tracing::warn!(device = %self.device_path().display(), "Camera device not found");
            return false;
        }

        let ffmpeg_ok = Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !ffmpeg_ok {
            tracing::warn!("ffmpeg not found; cannot read camera");
            return false;
        }

        self.opened = true;
        true
    }

    fn capture(&mut self) -> Option<RgbImage> {
        if !self.opened {
            return None;
        }

        let jpeg = match self.grab_jpeg() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(camera = self.index, error = %e, "Frame grab failed");
                return None;
            }
        };

        match image::load_from_memory(&jpeg) {
            Ok(frame) => Some(frame.to_rgb8()),
            Err(e) => {
                tracing::warn!(camera = self.index, error = %e, "Could not decode frame");
                None
            }
        }
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

/// List `(index, name)` of video devices, probing indices `0..max_index`.
pub fn list_cameras(max_index: u32) -> Vec<(u32, String)> {
    list_cameras_in(Path::new("/sys/class/video4linux"), max_index)
}

fn list_cameras_in(sysfs_root: &Path, max_index: u32) -> Vec<(u32, String)> {
    (0..max_index)
        .filter_map(|i| {
            let name_path = sysfs_root.join(format!("video{}", i)).join("name");
            std::fs::read_to_string(name_path)
                .ok()
                .map(|name| (i, name.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingCamera {
        opens: bool,
        closes: Rc<Cell<u32>>,
    }

    impl Camera for CountingCamera {
        fn open(&mut self) -> bool {
            self.opens
        }

        fn capture(&mut self) -> Option<RgbImage> {
            Some(RgbImage::new(4, 4))
        }

        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let closes = Rc::new(Cell::new(0));
        let mut camera = CountingCamera {
            opens: true,
            closes: closes.clone(),
        };

        {
            let mut open = OpenCamera::acquire(&mut camera).unwrap();
            assert!(open.capture().is_some());
            assert_eq!(closes.get(), 0);
        }

        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_failed_open_is_camera_unavailable() {
        let closes = Rc::new(Cell::new(0));
        let mut camera = CountingCamera {
            opens: false,
            closes: closes.clone(),
        };

        let result = OpenCamera::acquire(&mut camera);
        assert!(matches!(result, Err(Error::CameraUnavailable(_))));
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_unopened_ffmpeg_camera_captures_nothing() {
        let mut camera = FfmpegCamera::new(0);
        assert!(camera.capture().is_none());
    }

    #[test]
    fn test_list_cameras_reads_sysfs_names() {
        let root = tempfile::tempdir().unwrap();
        for (i, name) in [(0, "HD Webcam\n"), (2, "Pi Camera Module\n")] {
            let dir = root.path().join(format!("video{}", i));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("name"), name).unwrap();
        }

        let cameras = list_cameras_in(root.path(), 10);
        assert_eq!(
            cameras,
            vec![(0, "HD Webcam".to_string()), (2, "Pi Camera Module".to_string())]
        );
    }
}
