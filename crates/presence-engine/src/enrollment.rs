//! Enrollment pipeline: validate, filter capture samples, gate on sample
//! count, then commit the identity and the model update together.
//!
//! The user row is created only after the sample gate passes, and a failed
//! model commit rolls that row back, so a failed enrollment never leaves an
//! identity without trained samples.

use presence_core::{frame, Detect, FaceCrop, Frame, ModelError, ModelPaths, RecognitionModel};
use presence_store::{IdentityStore, StoreError};
use thiserror::Error;

/// Minimum detected face side, in pixels, for an enrollment sample. Larger
/// than the recognition minimum: training crops must be clearly resolved.
const ENROLL_MIN_FACE_SIZE: f32 = 50.0;
/// Dark-frame cutoff: fraction of pixels in the darkest bucket.
const DARK_FRAME_PCT: f32 = 0.95;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("employee id {0:?} is already registered")]
    DuplicateIdentity(String),
    #[error("could not detect a clear face in enough frames ({usable} usable, {required} required); please try again")]
    InsufficientSamples { usable: usize, required: usize },
    #[error("training failed: {0}")]
    Training(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Confirmation of a committed enrollment.
#[derive(Debug, Clone)]
pub struct EnrollReceipt {
    pub user_id: i64,
    pub name: String,
    pub samples_used: usize,
}

impl EnrollReceipt {
    /// Shell-facing confirmation line.
    pub fn message(&self) -> String {
        format!("Registered {} with {} samples", self.name, self.samples_used)
    }
}

/// Run a full enrollment over an already-captured frame sequence.
#[allow(clippy::too_many_arguments)]
pub fn register(
    detector: &mut dyn Detect,
    model: &mut RecognitionModel,
    store: &IdentityStore,
    paths: &ModelPaths,
    min_samples: usize,
    frames: &[Frame],
    name: &str,
    employee_id: &str,
) -> Result<EnrollReceipt, EnrollError> {
    let name = name.trim();
    let employee_id = employee_id.trim();

    if name.is_empty() {
        return Err(EnrollError::InvalidInput("name must not be empty"));
    }
    if employee_id.is_empty() {
        return Err(EnrollError::InvalidInput("employee id must not be empty"));
    }
    if frames.is_empty() {
        return Err(EnrollError::InvalidInput("no frames captured"));
    }

    // Reject duplicates before any detection work; create_user re-checks
    // atomically at commit time.
    if store.employee_id_exists(employee_id)? {
        return Err(EnrollError::DuplicateIdentity(employee_id.to_string()));
    }

    let crops = filter_samples(detector, frames);
    if crops.len() < min_samples {
        return Err(EnrollError::InsufficientSamples {
            usable: crops.len(),
            required: min_samples,
        });
    }

    let user_id = match store.create_user(name, employee_id) {
        Ok(id) => id,
        Err(StoreError::DuplicateEmployeeId(id)) => return Err(EnrollError::DuplicateIdentity(id)),
        Err(e) => return Err(e.into()),
    };

    let tagged: Vec<(FaceCrop, i64)> = crops.into_iter().map(|crop| (crop, user_id)).collect();
    let checkpoint = model.sample_count();

    let commit = (|| -> Result<(), ModelError> {
        model.update(&tagged)?;
        model.set_label_name(user_id, name);
        model.save(paths)
    })();

    if let Err(e) = commit {
        // Restore the in-memory model and remove the provisional identity;
        // the previously-saved artifacts on disk are untouched.
        model.truncate_samples(checkpoint);
        model.forget_label(user_id);
        if let Err(rollback) = store.delete_user(user_id) {
            tracing::error!(
                error = %rollback,
                user_id,
                "failed to roll back provisional user after training failure"
            );
        }
        return Err(e.into());
    }

    tracing::info!(user_id, name, samples = tagged.len(), "enrollment committed");
    Ok(EnrollReceipt {
        user_id,
        name: name.to_string(),
        samples_used: tagged.len(),
    })
}

/// Reduce raw capture frames to usable training crops: skip dark frames,
/// take the largest detected face per frame, and require the enrollment
/// minimum size. A per-frame detector failure only skips that frame.
fn filter_samples(detector: &mut dyn Detect, frames: &[Frame]) -> Vec<FaceCrop> {
    let mut crops = Vec::new();
    let mut dark_skipped = 0usize;

    for frame in frames {
        if frame.is_dark(DARK_FRAME_PCT) {
            dark_skipped += 1;
            continue;
        }
        let frame = frame.enhanced();

        let rects = match detector.detect(&frame) {
            Ok(rects) => rects,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed for a capture sample; skipping");
                continue;
            }
        };

        // Assume the subject is the one closest to the camera.
        let Some(largest) = rects.iter().max_by(|a, b| {
            a.area()
                .partial_cmp(&b.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            continue;
        };

        if largest.min_side() < ENROLL_MIN_FACE_SIZE {
            continue;
        }

        crops.push(frame::crop_face(&frame, largest));
    }

    tracing::debug!(
        total = frames.len(),
        usable = crops.len(),
        dark_skipped,
        "enrollment samples filtered"
    );
    crops
}
