//! Anchor-free ONNX face detector (SCRFD family).
//!
//! Decodes per-stride score and box tensors, applies NMS, and filters by
//! the configured minimum face size. Detection holds no state across calls
//! and is deterministic for a fixed parameter set. Landmark outputs, when
//! the model exports them, are ignored — the recognition model consumes
//! plain axis-aligned crops.

use crate::frame::{self, Frame};
use crate::types::FaceRect;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

/// Detection tunables, fixed at construction so repeated calls over the
/// same frame produce identical results.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    /// Minimum detection score for a candidate box.
    pub confidence_threshold: f32,
    /// IoU above which overlapping candidates are suppressed.
    pub nms_iou: f32,
    /// Minimum face side length in pixels; smaller detections are dropped.
    pub min_face_size: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_iou: 0.4,
            min_face_size: 30.0,
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face-finding seam consumed by the pipelines.
pub trait Detect: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, DetectorError>;
}

/// Metadata for mapping letterboxed coordinates back to frame space.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Per-stride (score, box) output tensor indices.
type StrideOutputs = (usize, usize);

pub struct FaceDetector {
    session: Session,
    params: DetectorParams,
    /// Output indices per stride, discovered by name at load time with a
    /// positional fallback.
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the detection model. A missing asset is reported here, at
    /// construction, never per call.
    pub fn load(model_path: &Path, params: DetectorParams) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded face detection model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector requires at least 6 outputs (3 strides x score/box), got {}",
                output_names.len()
            )));
        }

        let stride_outputs = discover_stride_outputs(&output_names);
        tracing::debug!(?stride_outputs, "detector output tensor mapping");

        Ok(Self {
            session,
            params,
            stride_outputs,
        })
    }

    /// Detect faces, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, DetectorError> {
        let (input, letterbox) = preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (score_idx, box_idx) = self.stride_outputs[pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[box_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(
                scores,
                boxes,
                stride,
                &letterbox,
                self.params.confidence_threshold,
            ));
        }

        let mut result = nms(candidates, self.params.nms_iou);
        result.retain(|r| r.min_side() >= self.params.min_face_size);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

impl Detect for FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, DetectorError> {
        FaceDetector::detect(self, frame)
    }
}

/// Letterbox a grayscale frame into a normalized NCHW tensor. The gray
/// channel is replicated across all three input channels; padding uses the
/// model mean so it normalizes to zero.
fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
    let width = frame.width as usize;
    let height = frame.height as usize;

    let scale = (DET_INPUT_SIZE as f32 / width as f32).min(DET_INPUT_SIZE as f32 / height as f32);
    let new_w = (width as f32 * scale).round() as usize;
    let new_h = (height as f32 * scale).round() as usize;
    let pad_x = (DET_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (DET_INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = frame::resize_bilinear(&frame.data, width, height, new_w, new_h);

    let x_start = pad_x.floor() as usize;
    let y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));
    for y in 0..DET_INPUT_SIZE {
        for x in 0..DET_INPUT_SIZE {
            let inside =
                y >= y_start && y < y_start + new_h && x >= x_start && x < x_start + new_w;
            let pixel = if inside {
                resized[(y - y_start) * new_w + (x - x_start)] as f32
            } else {
                DET_MEAN
            };
            let normalized = (pixel - DET_MEAN) / DET_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

/// Map output tensors to (score, box) slots per stride.
///
/// Exports may carry recognizable names ("score_8", "bbox_16", ...) or
/// generic numeric ones. With recognizable names the mapping follows them;
/// otherwise the standard positional layout applies: outputs [0..3) are
/// scores and [3..6) are boxes for strides 8/16/32 in order.
fn discover_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = DET_STRIDES
        .iter()
        .all(|&stride| find("score", stride).is_some() && find("bbox", stride).is_some());

    if named {
        tracing::info!("detector: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = DET_STRIDES[i];
            // Both lookups verified present just above.
            (
                find("score", stride).unwrap_or(i),
                find("bbox", stride).unwrap_or(i + 3),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "detector: output names not recognized, using positional mapping"
        );
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode one stride level: anchor centers on a regular grid, box offsets
/// in stride units, coordinates mapped back through the letterbox.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceRect> {
    let grid_w = DET_INPUT_SIZE / stride;
    let grid_h = DET_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * DET_ANCHORS_PER_CELL;

    let mut rects = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid_w) as f32 * stride as f32;
        let anchor_cy = (cell / grid_w) as f32 * stride as f32;

        let off = idx * 4;
        if off + 3 >= boxes.len() {
            continue;
        }
        let x1 = anchor_cx - boxes[off] * stride as f32;
        let y1 = anchor_cy - boxes[off + 1] * stride as f32;
        let x2 = anchor_cx + boxes[off + 2] * stride as f32;
        let y2 = anchor_cy + boxes[off + 3] * stride as f32;

        let frame_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let frame_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let frame_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let frame_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        rects.push(FaceRect {
            x: frame_x1,
            y: frame_y1,
            width: frame_x2 - frame_x1,
            height: frame_y2 - frame_y1,
            confidence: score,
        });
    }

    rects
}

/// Non-maximum suppression: keep the highest-confidence box of each
/// overlapping cluster.
fn nms(mut rects: Vec<FaceRect>, iou_threshold: f32) -> Vec<FaceRect> {
    rects.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; rects.len()];

    for i in 0..rects.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(rects[i].clone());
        for j in (i + 1)..rects.len() {
            if !suppressed[j] && iou(&rects[i], &rects[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &FaceRect, b: &FaceRect) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
