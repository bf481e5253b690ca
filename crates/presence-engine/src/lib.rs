//! presence-engine — orchestration for the attendance pipelines.
//!
//! The engine owns the face detector, the recognition model, and the
//! identity store on a dedicated thread; the presentation shell talks to it
//! through an async handle, one request at a time. That single-threaded
//! loop is what serializes recognition against enrollment commits.

pub mod capture;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod recognition;

#[cfg(test)]
pub(crate) mod testutil;

pub use capture::{collect_session, CaptureError, FrameCell};
pub use config::Config;
pub use engine::{spawn_engine, EngineConfig, EngineError, EngineHandle};
pub use enrollment::{EnrollError, EnrollReceipt};
pub use recognition::{AttendanceMark, FaceObservation, FrameReport};
