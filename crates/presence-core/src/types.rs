use serde::{Deserialize, Serialize};

/// Side length of the canonical grayscale crop the recognition model consumes.
pub const FACE_CROP_SIZE: usize = 96;

/// Axis-aligned bounding box for a detected face, in frame coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRect {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Shorter side in pixels; used for minimum-size gating.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// A grayscale face crop at the canonical model input size.
///
/// Produced only by [`crate::frame::crop_face`], so the pixel buffer is
/// always `FACE_CROP_SIZE * FACE_CROP_SIZE` bytes, row-major.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub pixels: Vec<u8>,
}

/// Best-match output of the recognition model.
///
/// `distance` is non-negative; lower means a closer match. Acceptance is the
/// caller's decision, made by comparing against its configured threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i64,
    pub distance: f32,
}
