//! Per-frame recognition pipeline: detect, classify, threshold, log.
//!
//! Holds no state between frames. "Unknown" and "already logged today" are
//! normal outcomes; only store I/O failures propagate to the caller.

use presence_core::{frame, Detect, FaceRect, Frame, RecognitionModel};
use presence_store::{IdentityStore, LogOutcome, StoreError};

pub const UNKNOWN_NAME: &str = "Unknown";

/// Store outcome for an accepted match, surfaced so the shell can give the
/// right feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceMark {
    Recorded,
    AlreadyRecorded,
}

/// One detected face with its resolved identity and store outcome.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub rect: FaceRect,
    /// Display name, or `"Unknown"` when no confident match.
    pub name: String,
    /// Matched user id; `None` for unknown faces.
    pub user_id: Option<i64>,
    pub attendance: Option<AttendanceMark>,
}

impl FaceObservation {
    /// Shell-facing feedback line for a recognized face.
    pub fn greeting(&self) -> Option<String> {
        match self.attendance {
            Some(AttendanceMark::Recorded) => {
                Some(format!("Welcome, {}! Marked present.", self.name))
            }
            Some(AttendanceMark::AlreadyRecorded) => {
                Some(format!("{} already took attendance today.", self.name))
            }
            None => None,
        }
    }
}

/// Everything the pipeline saw in one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub faces: Vec<FaceObservation>,
}

impl FrameReport {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Process one frame synchronously.
///
/// A detector failure is recovered here: the frame is skipped with a
/// warning and an empty report, since the next tick brings a fresh frame.
pub fn process_frame(
    detector: &mut dyn Detect,
    model: &RecognitionModel,
    store: &IdentityStore,
    distance_threshold: f32,
    frame: &Frame,
) -> Result<FrameReport, StoreError> {
    let frame = frame.enhanced();

    let rects = match detector.detect(&frame) {
        Ok(rects) => rects,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed; skipping frame");
            return Ok(FrameReport::default());
        }
    };

    let mut faces = Vec::with_capacity(rects.len());
    for rect in rects {
        let crop = frame::crop_face(&frame, &rect);

        let mut name = UNKNOWN_NAME.to_string();
        let mut user_id = None;
        let mut attendance = None;

        if let Some(prediction) = model.classify(&crop) {
            tracing::debug!(
                label = prediction.label,
                distance = prediction.distance,
                "classified face"
            );
            if prediction.distance < distance_threshold {
                // A label with no name would mean the model and the store
                // disagree; treat it as unknown rather than logging it.
                if let Some(known) = model.name_of(prediction.label) {
                    name = known.to_string();
                    user_id = Some(prediction.label);

                    let outcome = store.log_attendance(prediction.label, known)?;
                    attendance = Some(match outcome {
                        LogOutcome::Logged { .. } => AttendanceMark::Recorded,
                        LogOutcome::AlreadyLoggedToday => AttendanceMark::AlreadyRecorded,
                    });
                } else {
                    tracing::warn!(label = prediction.label, "matched label has no name mapping");
                }
            }
        }

        faces.push(FaceObservation {
            rect,
            name,
            user_id,
            attendance,
        });
    }

    Ok(FrameReport { faces })
}
