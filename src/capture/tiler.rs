//! Frame → centered crop → row-major grid of square tiles

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Tile edge length in pixels (also the detector input size)
pub const TILE_SIZE: u32 = 300;
/// Tiles per row
pub const GRID_COLS: u32 = 6;
/// Rows of tiles
pub const GRID_ROWS: u32 = 3;
/// Largest upscale a usable frame may need (a 240x120 frame needs 7.5)
pub const MAX_UPSCALE: f64 = 8.0;

/// Fixed tiling geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub tile_size: u32,
    pub cols: u32,
    pub rows: u32,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            cols: GRID_COLS,
            rows: GRID_ROWS,
        }
    }
}

impl TileGrid {
    /// Width of the centered crop
    pub fn crop_width(&self) -> u32 {
        self.tile_size * self.cols
    }

    /// Height of the centered crop
    pub fn crop_height(&self) -> u32 {
        self.tile_size * self.rows
    }

    /// Number of tiles produced per frame
    pub fn tile_count(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    /// Split a frame into the crop and its tiles.
    ///
    /// Frames smaller than the crop in either dimension are first upscaled by a
    /// single uniform factor. Tiles come back in row-major order, so the tile
    /// at `row, col` sits at index `row * cols + col`.
    pub fn tile(&self, frame: &RgbImage) -> (RgbImage, Vec<RgbImage>) {
        let crop_w = self.crop_width();
        let crop_h = self.crop_height();

        let upscaled;
        let frame = match self.upscaled_size(frame.width(), frame.height()) {
            Some((new_w, new_h)) => {
                tracing::debug!(
                    from_w = frame.width(),
                    from_h = frame.height(),
                    to_w = new_w,
                    to_h = new_h,
                    "Upscaling frame to fit crop"
                );
                upscaled = imageops::resize(frame, new_w, new_h, FilterType::Triangle);
                &upscaled
            }
            None => frame,
        };

        let x_off = (frame.width() - crop_w) / 2;
        let y_off = (frame.height() - crop_h) / 2;
        let cropped = imageops::crop_imm(frame, x_off, y_off, crop_w, crop_h).to_image();

        let mut tiles = Vec::with_capacity(self.tile_count());
        for row in 0..self.rows {
            for col in 0..self.cols {
                let tile = imageops::crop_imm(
                    &cropped,
                    col * self.tile_size,
                    row * self.tile_size,
                    self.tile_size,
                    self.tile_size,
                )
                .to_image();
                tiles.push(tile);
            }
        }

        (cropped, tiles)
    }

    /// Uniform factor a frame must be scaled by to cover the crop: `1.0` when it
    /// already does, infinite for an empty frame.
    pub fn upscale_factor(&self, width: u32, height: u32) -> f64 {
        let scale = f64::max(
            self.crop_width() as f64 / width as f64,
            self.crop_height() as f64 / height as f64,
        );
        scale.max(1.0)
    }

    /// Target size for a frame that does not cover the crop, or `None` if it does.
    ///
    /// Both axes use `scale = max(crop_w / w, crop_h / h)`. Rounding can land a
    /// pixel short of the crop, so each axis is clamped to the crop size.
    /// Callers reject frames whose factor exceeds `MAX_UPSCALE` first.
    pub fn upscaled_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let crop_w = self.crop_width();
        let crop_h = self.crop_height();
        if width >= crop_w && height >= crop_h {
            return None;
        }

        let scale = self.upscale_factor(width, height);
        let new_w = ((width as f64 * scale).round() as u32).max(crop_w);
        let new_h = ((height as f64 * scale).round() as u32).max(crop_h);
        Some((new_w, new_h))
    }
}
