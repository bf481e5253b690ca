//! Shared helpers for pipeline tests: a scriptable detector stub and
//! deterministic synthetic frames.

use presence_core::{Detect, DetectorError, FaceRect, Frame, FACE_CROP_SIZE};

pub(crate) struct StubDetector {
    pub rects: Vec<FaceRect>,
    pub fail: bool,
}

impl Detect for StubDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<FaceRect>, DetectorError> {
        if self.fail {
            return Err(DetectorError::InferenceFailed("stub failure".into()));
        }
        Ok(self.rects.clone())
    }
}

pub(crate) fn full_frame_rect() -> FaceRect {
    FaceRect {
        x: 0.0,
        y: 0.0,
        width: FACE_CROP_SIZE as f32,
        height: FACE_CROP_SIZE as f32,
        confidence: 0.9,
    }
}

/// Canonical-size frame with a deterministic wrapped-ramp texture.
/// Different (a, b) coefficients stand in for different subjects; the
/// offset varies brightness the way successive camera frames would.
pub(crate) fn textured_frame(a: u32, b: u32, offset: u32) -> Frame {
    let size = FACE_CROP_SIZE as u32;
    let mut data = vec![0u8; (size * size) as usize];
    for y in 0..size {
        for x in 0..size {
            data[(y * size + x) as usize] = ((a * x + b * y + offset) % 251) as u8;
        }
    }
    Frame::from_gray(data, size, size).unwrap()
}
