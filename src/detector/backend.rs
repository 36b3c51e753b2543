//! Inference runtime
//!
//! The detection model is a YOLOv4-style ONNX graph executed by tract. It takes
//! one NHWC `f32` image scaled to `[0, 1]` and returns one raw head per stride,
//! each shaped `[1, grid, grid, anchors, 5 + classes]`: box offsets,
//! objectness, then per-class probabilities. Decoding the heads into boxes and
//! suppressing overlaps is done here; the graph itself has no post-processing.

use std::cmp::Ordering;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::error::{Error, Result};

/// One row of raw model output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: i64,
    pub confidence: f32,
    /// top, left, bottom, right; normalized
    pub bbox: [f32; 4],
}

/// Something that can run the detection model on one RGB image.
pub trait InferenceBackend: Send + Sync {
    /// Every candidate left after decoding, highest confidence first.
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// Load the ONNX model at `path`.
pub fn load_backend(path: &Path) -> Result<Box<dyn InferenceBackend>> {
    if !path.is_file() {
        return Err(Error::ModelUnavailable(format!(
            "model file not found: {}",
            path.display()
        )));
    }

    let model = tract_onnx::onnx().model_for_path(path).map_err(model_error)?;
    Ok(Box::new(TractBackend::new(model, HeadLayout::yolov4())?))
}

/// Geometry of the detection heads
#[derive(Debug, Clone, PartialEq)]
pub struct HeadLayout {
    /// Square model input edge, in pixels
    pub input_size: u32,
    /// Anchor (width, height) in input pixels, per head from finest grid to coarsest
    pub anchors: Vec<Vec<[f32; 2]>>,
    /// Center scale per head (YOLOv4 "scale_x_y")
    pub xy_scale: Vec<f32>,
    /// Overlap above which a weaker box of the same class is dropped
    pub iou_threshold: f32,
    /// Candidates scoring below this never reach suppression
    pub score_floor: f32,
}

impl HeadLayout {
    /// ONNX model zoo YOLOv4 (COCO, 416×416)
    pub fn yolov4() -> Self {
        Self {
            input_size: 416,
            anchors: vec![
                vec![[12.0, 16.0], [19.0, 36.0], [40.0, 28.0]],
                vec![[36.0, 75.0], [76.0, 55.0], [72.0, 146.0]],
                vec![[142.0, 110.0], [192.0, 243.0], [459.0, 401.0]],
            ],
            xy_scale: vec![1.2, 1.1, 1.05],
            iou_threshold: 0.45,
            score_floor: 0.01,
        }
    }
}

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// YOLO detector graph executed by tract
pub struct TractBackend {
    plan: Plan,
    layout: HeadLayout,
}

impl TractBackend {
    fn new(model: InferenceModel, layout: HeadLayout) -> Result<Self> {
        let side = layout.input_size as usize;
        let plan = model
            .with_input_fact(0, f32::fact([1, side, side, 3]).into())
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(model_error)?;

        let outputs = plan.model().output_outlets().map_err(model_error)?.len();
        if outputs != layout.anchors.len() {
            return Err(Error::ModelUnavailable(format!(
                "expected {} detection heads, model has {} outputs",
                layout.anchors.len(),
                outputs
            )));
        }

        tracing::debug!(input_size = layout.input_size, heads = outputs, "Detection plan ready");
        Ok(Self { plan, layout })
    }

    /// NHWC f32 tensor of the image in `[0, 1]`, resized to the model input
    fn input_tensor(&self, image: &RgbImage) -> Tensor {
        let size = self.layout.input_size;
        let resized;
        let image = if image.dimensions() == (size, size) {
            image
        } else {
            resized = imageops::resize(image, size, size, FilterType::Triangle);
            &resized
        };

        let side = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
        .into()
    }
}

impl InferenceBackend for TractBackend {
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.input_tensor(image);
        let outputs = self.plan.run(tvec!(input.into())).map_err(inference_error)?;

        let mut heads = Vec::with_capacity(outputs.len());
        for output in outputs.iter() {
            let values = output.cast_to::<f32>().map_err(inference_error)?;
            let data = values.as_slice::<f32>().map_err(inference_error)?.to_vec();
            heads.push((output.shape().to_vec(), data));
        }

        let views: Vec<(&[usize], &[f32])> = heads
            .iter()
            .map(|(shape, data)| (shape.as_slice(), data.as_slice()))
            .collect();
        let candidates = decode_heads(&views, &self.layout)?;
        Ok(suppress(candidates, self.layout.iou_threshold))
    }
}

/// Turn raw heads into one candidate per anchor box (its best class).
///
/// Heads may arrive in any order; they are matched to anchor sets by grid
/// size, finest first.
fn decode_heads(heads: &[(&[usize], &[f32])], layout: &HeadLayout) -> Result<Vec<RawDetection>> {
    if heads.len() != layout.anchors.len() {
        return Err(Error::Inference(format!(
            "expected {} heads, got {}",
            layout.anchors.len(),
            heads.len()
        )));
    }

    let mut order: Vec<usize> = (0..heads.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(heads[i].0.get(1).copied().unwrap_or(0)));

    let size = layout.input_size as f32;
    let mut candidates = Vec::new();

    for (level, &head) in order.iter().enumerate() {
        let (shape, data) = heads[head];
        let anchors = &layout.anchors[level];
        let (grid, channels) = match shape {
            [1, rows, cols, count, channels]
                if rows == cols && *count == anchors.len() && *channels > 5 =>
            {
                (*rows, *channels)
            }
            _ => {
                return Err(Error::Inference(format!("unexpected head shape {:?}", shape)))
            }
        };
        if data.len() != grid * grid * anchors.len() * channels {
            return Err(Error::Inference(format!(
                "head {:?} holds {} values",
                shape,
                data.len()
            )));
        }

        let stride = size / grid as f32;
        let scale = layout.xy_scale.get(level).copied().unwrap_or(1.0);

        for row in 0..grid {
            for col in 0..grid {
                for (a, anchor) in anchors.iter().enumerate() {
                    let base = ((row * grid + col) * anchors.len() + a) * channels;
                    let cell = &data[base..base + channels];

                    let objectness = cell[4];
                    if objectness < layout.score_floor {
                        continue;
                    }
                    let (class, probability) = cell[5..]
                        .iter()
                        .copied()
                        .enumerate()
                        .max_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(Ordering::Equal))
                        .unwrap_or((0, 0.0));
                    let confidence = objectness * probability;
                    if confidence < layout.score_floor {
                        continue;
                    }

                    let offset = 0.5 * (scale - 1.0);
                    let cx = (sigmoid(cell[0]) * scale - offset + col as f32) * stride;
                    let cy = (sigmoid(cell[1]) * scale - offset + row as f32) * stride;
                    let w = cell[2].exp() * anchor[0];
                    let h = cell[3].exp() * anchor[1];

                    candidates.push(RawDetection {
                        class_id: class as i64,
                        confidence,
                        bbox: [
                            ((cy - h / 2.0) / size).clamp(0.0, 1.0),
                            ((cx - w / 2.0) / size).clamp(0.0, 1.0),
                            ((cy + h / 2.0) / size).clamp(0.0, 1.0),
                            ((cx + w / 2.0) / size).clamp(0.0, 1.0),
                        ],
                    });
                }
            }
        }
    }

    Ok(candidates)
}

/// Greedy per-class non-maximum suppression; survivors ordered by confidence
fn suppress(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let top = a[0].max(b[0]);
    let left = a[1].max(b[1]);
    let bottom = a[2].min(b[2]);
    let right = a[3].min(b[3]);

    let intersection = (bottom - top).max(0.0) * (right - left).max(0.0);
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn model_error(e: TractError) -> Error {
    Error::ModelUnavailable(format!("{:#}", e))
}

fn inference_error(e: TractError) -> Error {
    Error::Inference(format!("{:#}", e))
}
