use presence_core::{DetectorParams, ModelPaths, DEFAULT_DISTANCE_THRESHOLD};
use presence_store::MirrorConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Directory holding the recognition model artifacts.
    pub model_dir: PathBuf,
    /// Path to the ONNX face detection model.
    pub detector_model: PathBuf,
    /// Maximum classifier distance accepted as a match (lower = stricter).
    pub distance_threshold: f32,
    /// Minimum usable samples required to commit an enrollment.
    pub min_enroll_samples: usize,
    /// Minimum detected face side length in pixels.
    pub min_face_size: f32,
    /// Number of snapshots an enrollment capture session collects.
    pub capture_samples: usize,
    /// Spacing between capture snapshots, in milliseconds.
    pub capture_interval_ms: u64,
    /// Remote mirror settings; `None` when mirroring is disabled.
    pub mirror: Option<MirrorConfig>,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let model_dir = std::env::var("PRESENCE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("model"));

        let detector_model = std::env::var("PRESENCE_DETECTOR_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join("det_10g.onnx"));

        let mirror_enabled = std::env::var("PRESENCE_MIRROR_ENABLED")
            .map(|v| v != "0")
            .unwrap_or(false);
        let mirror = if mirror_enabled {
            match std::env::var("PRESENCE_MIRROR_ENDPOINT") {
                Ok(endpoint) if !endpoint.trim().is_empty() => Some(MirrorConfig {
                    endpoint,
                    api_key: std::env::var("PRESENCE_MIRROR_API_KEY").ok(),
                }),
                _ => {
                    tracing::warn!(
                        "PRESENCE_MIRROR_ENABLED is set but PRESENCE_MIRROR_ENDPOINT is not; mirroring disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            db_path,
            model_dir,
            detector_model,
            distance_threshold: env_f32("PRESENCE_DISTANCE_THRESHOLD", DEFAULT_DISTANCE_THRESHOLD),
            min_enroll_samples: env_usize("PRESENCE_MIN_ENROLL_SAMPLES", 5),
            min_face_size: env_f32("PRESENCE_MIN_FACE_SIZE", 30.0),
            capture_samples: env_usize("PRESENCE_CAPTURE_SAMPLES", 30),
            capture_interval_ms: env_u64("PRESENCE_CAPTURE_INTERVAL_MS", 50),
            mirror,
        }
    }

    /// Locations of the recognition model artifacts.
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            min_face_size: self.min_face_size,
            ..DetectorParams::default()
        }
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
