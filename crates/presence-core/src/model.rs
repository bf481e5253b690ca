//! Trainable face recognition via local-binary-pattern histograms.
//!
//! Each enrollment sample becomes a spatial LBP histogram; classification is
//! nearest-neighbor chi-square distance over all stored samples, so new
//! identities (or more samples for an existing one) are absorbed by
//! appending histograms — no retraining pass and no raw-image retention.
//! State persists as two companion artifacts: the classifier state and the
//! label-to-name map.

use crate::types::{FaceCrop, Prediction, FACE_CROP_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cells per side of the spatial histogram grid.
const LBP_GRID: usize = 8;
/// Bins per cell (one per 8-bit LBP code).
const LBP_BINS: usize = 256;
const STATE_VERSION: u32 = 1;

/// Maximum distance at which a classification is accepted as a match.
/// Lower is stricter; identical crops score 0.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 65.0;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cannot update the model with an empty sample batch")]
    EmptyUpdate,
    #[error("failed to persist model artifacts: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode model artifacts: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Locations of the two companion artifacts. They are read together at
/// startup and replaced together after every successful enrollment.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub labels: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            model: dir.join("recognizer.json"),
            labels: dir.join("labels.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabeledHistogram {
    label: i64,
    histogram: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelState {
    version: u32,
    samples: Vec<LabeledHistogram>,
}

/// Incremental LBP histogram classifier plus the label-to-name map.
pub struct RecognitionModel {
    samples: Vec<LabeledHistogram>,
    labels: HashMap<i64, String>,
}

impl RecognitionModel {
    /// An empty model: every classification reports no match.
    pub fn untrained() -> Self {
        Self {
            samples: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Load both artifacts, best-effort: missing or unreadable artifacts
    /// yield the untrained state with a log line, never an error.
    pub fn load(paths: &ModelPaths) -> Self {
        if !paths.model.exists() || !paths.labels.exists() {
            tracing::info!("no trained model artifacts found; starting untrained");
            return Self::untrained();
        }
        match Self::read(paths) {
            Ok(model) => {
                tracing::info!(
                    samples = model.samples.len(),
                    labels = model.labels.len(),
                    "loaded trained model"
                );
                model
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load model artifacts; starting untrained");
                Self::untrained()
            }
        }
    }

    fn read(paths: &ModelPaths) -> Result<Self, ModelError> {
        let state: ModelState = serde_json::from_slice(&fs::read(&paths.model)?)?;
        let labels: HashMap<i64, String> = serde_json::from_slice(&fs::read(&paths.labels)?)?;
        Ok(Self {
            samples: state.samples,
            labels,
        })
    }

    pub fn is_trained(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Best-matching label and its distance, or `None` when untrained.
    /// The caller applies the acceptance threshold.
    pub fn classify(&self, crop: &FaceCrop) -> Option<Prediction> {
        if self.samples.is_empty() {
            return None;
        }
        let probe = spatial_histogram(crop);
        let mut best: Option<Prediction> = None;
        for sample in &self.samples {
            let distance = chi_square(&probe, &sample.histogram);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction {
                    label: sample.label,
                    distance,
                });
            }
        }
        best
    }

    /// Append labeled samples without touching existing knowledge. Works
    /// for previously-unseen labels and for extra samples of known ones.
    pub fn update(&mut self, samples: &[(FaceCrop, i64)]) -> Result<usize, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::EmptyUpdate);
        }
        for (crop, label) in samples {
            self.samples.push(LabeledHistogram {
                label: *label,
                histogram: spatial_histogram(crop),
            });
        }
        Ok(samples.len())
    }

    pub fn set_label_name(&mut self, label: i64, name: &str) {
        self.labels.insert(label, name.to_string());
    }

    pub fn name_of(&self, label: i64) -> Option<&str> {
        self.labels.get(&label).map(String::as_str)
    }

    /// Drop samples past `len`. Used to revert a failed incremental update.
    pub fn truncate_samples(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    /// Remove a label from the name map. Used to revert a failed update.
    pub fn forget_label(&mut self, label: i64) -> Option<String> {
        self.labels.remove(&label)
    }

    /// Persist both artifacts. Each is staged to a temp file first and then
    /// renamed, so the pair on disk is replaced together; a failure leaves
    /// the previously-saved artifacts in place.
    pub fn save(&self, paths: &ModelPaths) -> Result<(), ModelError> {
        for path in [&paths.model, &paths.labels] {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)?;
                }
            }
        }

        let state = ModelState {
            version: STATE_VERSION,
            samples: self.samples.clone(),
        };
        let staged_model = staging_path(&paths.model);
        let staged_labels = staging_path(&paths.labels);
        fs::write(&staged_model, serde_json::to_vec(&state)?)?;
        fs::write(&staged_labels, serde_json::to_vec(&self.labels)?)?;
        fs::rename(&staged_model, &paths.model)?;
        fs::rename(&staged_labels, &paths.labels)?;

        tracing::info!(
            samples = self.samples.len(),
            labels = self.labels.len(),
            "model artifacts saved"
        );
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

/// Compute the 8-neighbor LBP code for every interior pixel, then histogram
/// the codes over an `LBP_GRID` x `LBP_GRID` spatial grid, L1-normalizing
/// each cell. Comparing a neighbor with `>=` makes the code invariant to
/// uniform brightness shifts.
fn spatial_histogram(crop: &FaceCrop) -> Vec<f32> {
    let size = FACE_CROP_SIZE;
    let px = &crop.pixels;
    let interior = size - 2;

    let mut hist = vec![0u32; LBP_GRID * LBP_GRID * LBP_BINS];
    let mut cell_totals = vec![0u32; LBP_GRID * LBP_GRID];

    for y in 1..size - 1 {
        for x in 1..size - 1 {
            let center = px[y * size + x];
            // Neighbors clockwise from the top-left corner.
            let mut code = 0u8;
            let neighbors = [
                px[(y - 1) * size + (x - 1)],
                px[(y - 1) * size + x],
                px[(y - 1) * size + (x + 1)],
                px[y * size + (x + 1)],
                px[(y + 1) * size + (x + 1)],
                px[(y + 1) * size + x],
                px[(y + 1) * size + (x - 1)],
                px[y * size + (x - 1)],
            ];
            for (bit, &n) in neighbors.iter().enumerate() {
                if n >= center {
                    code |= 1 << bit;
                }
            }

            let cell_x = (x - 1) * LBP_GRID / interior;
            let cell_y = (y - 1) * LBP_GRID / interior;
            let cell = cell_y * LBP_GRID + cell_x;
            hist[cell * LBP_BINS + code as usize] += 1;
            cell_totals[cell] += 1;
        }
    }

    let mut out = vec![0f32; hist.len()];
    for cell in 0..LBP_GRID * LBP_GRID {
        let total = cell_totals[cell];
        if total == 0 {
            continue;
        }
        for bin in 0..LBP_BINS {
            out[cell * LBP_BINS + bin] = hist[cell * LBP_BINS + bin] as f32 / total as f32;
        }
    }
    out
}

/// Chi-square distance between two normalized histograms. Zero for
/// identical inputs; grows toward twice the cell count for disjoint ones.
fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let sum = x + y;
            if sum > 0.0 {
                (x - y) * (x - y) / sum
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Deterministic texture: a wrapped linear ramp. Different (a, b)
    /// coefficients produce structurally different LBP code fields, while
    /// the `offset` only shifts brightness (LBP-invariant except at wraps).
    fn textured(a: u32, b: u32, offset: u32) -> FaceCrop {
        let size = FACE_CROP_SIZE;
        let mut pixels = vec![0u8; size * size];
        for y in 0..size {
            for x in 0..size {
                pixels[y * size + x] = ((a * x as u32 + b * y as u32 + offset) % 251) as u8;
            }
        }
        FaceCrop { pixels }
    }

    fn uniform(value: u8) -> FaceCrop {
        FaceCrop {
            pixels: vec![value; FACE_CROP_SIZE * FACE_CROP_SIZE],
        }
    }

    #[test]
    fn untrained_model_never_matches() {
        let model = RecognitionModel::untrained();
        assert!(!model.is_trained());
        assert!(model.classify(&uniform(128)).is_none());
        assert!(model.classify(&textured(7, 13, 0)).is_none());
    }

    #[test]
    fn update_rejects_empty_batch() {
        let mut model = RecognitionModel::untrained();
        assert!(matches!(model.update(&[]), Err(ModelError::EmptyUpdate)));
    }

    #[test]
    fn chi_square_zero_for_identical() {
        let h = spatial_histogram(&textured(7, 13, 0));
        assert_eq!(chi_square(&h, &h), 0.0);
    }

    #[test]
    fn identical_crop_scores_zero_distance() {
        let mut model = RecognitionModel::untrained();
        model.update(&[(textured(7, 13, 0), 1)]).unwrap();
        let pred = model.classify(&textured(7, 13, 0)).unwrap();
        assert_eq!(pred.label, 1);
        assert!(pred.distance < 1e-6);
    }

    #[test]
    fn similar_crop_scores_below_threshold() {
        // A brightness-shifted rendition of the same texture stands in for
        // another frame of the same subject.
        let mut model = RecognitionModel::untrained();
        model.update(&[(textured(7, 13, 0), 1)]).unwrap();
        let pred = model.classify(&textured(7, 13, 40)).unwrap();
        assert_eq!(pred.label, 1);
        assert!(
            pred.distance < DEFAULT_DISTANCE_THRESHOLD,
            "distance {} should be under the acceptance threshold",
            pred.distance
        );
    }

    #[test]
    fn dissimilar_crop_scores_above_threshold() {
        let mut model = RecognitionModel::untrained();
        model.update(&[(textured(7, 13, 0), 1)]).unwrap();
        let pred = model.classify(&uniform(128)).unwrap();
        assert!(
            pred.distance > DEFAULT_DISTANCE_THRESHOLD,
            "distance {} should exceed the acceptance threshold",
            pred.distance
        );
    }

    #[test]
    fn discriminates_between_two_identities() {
        let mut model = RecognitionModel::untrained();
        model
            .update(&[(textured(7, 13, 0), 1), (textured(7, 13, 20), 1)])
            .unwrap();
        model
            .update(&[(textured(13, 7, 0), 2), (textured(13, 7, 20), 2)])
            .unwrap();

        let first = model.classify(&textured(7, 13, 50)).unwrap();
        assert_eq!(first.label, 1);
        assert!(first.distance < DEFAULT_DISTANCE_THRESHOLD);

        let second = model.classify(&textured(13, 7, 50)).unwrap();
        assert_eq!(second.label, 2);
        assert!(second.distance < DEFAULT_DISTANCE_THRESHOLD);
    }

    #[test]
    fn incremental_update_preserves_existing_labels() {
        let mut model = RecognitionModel::untrained();
        model.update(&[(textured(7, 13, 0), 1)]).unwrap();
        model.set_label_name(1, "Alice");
        model.update(&[(textured(13, 7, 0), 2)]).unwrap();
        model.set_label_name(2, "Bob");

        assert_eq!(model.sample_count(), 2);
        assert_eq!(model.classify(&textured(7, 13, 10)).unwrap().label, 1);
        assert_eq!(model.name_of(1), Some("Alice"));
        assert_eq!(model.name_of(2), Some("Bob"));
    }

    #[test]
    fn save_load_roundtrip_reproduces_classifications() {
        let dir = tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());

        let mut model = RecognitionModel::untrained();
        model
            .update(&[(textured(7, 13, 0), 3), (textured(13, 7, 0), 4)])
            .unwrap();
        model.set_label_name(3, "Alice");
        model.set_label_name(4, "Bob");
        model.save(&paths).unwrap();

        let reloaded = RecognitionModel::load(&paths);
        assert!(reloaded.is_trained());
        assert_eq!(reloaded.name_of(3), Some("Alice"));

        for probe in [textured(7, 13, 30), textured(13, 7, 30), uniform(90)] {
            let before = model.classify(&probe).unwrap();
            let after = reloaded.classify(&probe).unwrap();
            assert_eq!(before.label, after.label);
            assert!((before.distance - after.distance).abs() < 1e-6);
        }
    }

    #[test]
    fn load_missing_artifacts_starts_untrained() {
        let dir = tempdir().unwrap();
        let model = RecognitionModel::load(&ModelPaths::in_dir(dir.path()));
        assert!(!model.is_trained());
    }

    #[test]
    fn load_corrupt_artifacts_starts_untrained() {
        let dir = tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        std::fs::write(&paths.model, b"not json").unwrap();
        std::fs::write(&paths.labels, b"{]").unwrap();
        let model = RecognitionModel::load(&paths);
        assert!(!model.is_trained());
    }

    #[test]
    fn revert_restores_pre_update_state() {
        let mut model = RecognitionModel::untrained();
        model.update(&[(textured(7, 13, 0), 1)]).unwrap();
        model.set_label_name(1, "Alice");

        let checkpoint = model.sample_count();
        model.update(&[(textured(13, 7, 0), 2)]).unwrap();
        model.set_label_name(2, "Bob");

        model.truncate_samples(checkpoint);
        model.forget_label(2);

        assert_eq!(model.sample_count(), 1);
        assert_eq!(model.label_count(), 1);
        assert_eq!(model.classify(&textured(13, 7, 0)).unwrap().label, 1);
    }

    #[test]
    fn save_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let mut model = RecognitionModel::untrained();
        model.update(&[(textured(7, 13, 0), 1)]).unwrap();
        model.set_label_name(1, "Alice");
        model.save(&paths).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"recognizer.json".to_string()));
        assert!(names.contains(&"labels.json".to_string()));
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }
}
