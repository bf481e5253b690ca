//! presence-core — face detection and trainable recognition.
//!
//! Detection runs an anchor-free SCRFD-family model via ONNX Runtime.
//! Recognition is a local-binary-pattern histogram classifier that learns
//! incrementally from enrollment samples and persists to two companion
//! artifacts (classifier state and the label-to-name map).

pub mod detector;
pub mod frame;
pub mod model;
pub mod types;

pub use detector::{Detect, DetectorError, DetectorParams, FaceDetector};
pub use frame::{Frame, FrameError};
pub use model::{ModelError, ModelPaths, RecognitionModel, DEFAULT_DISTANCE_THRESHOLD};
pub use types::{FaceCrop, FaceRect, Prediction, FACE_CROP_SIZE};
