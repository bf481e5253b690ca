//! Engine thread and its async handle.
//!
//! The engine owns the detector, the recognition model, and the identity
//! store, and processes requests strictly one at a time on a dedicated OS
//! thread. That makes the concurrency contract structural: a new frame is
//! only processed after the previous one completes, and an enrollment
//! commit can never overlap a classification.

use crate::enrollment::{self, EnrollError, EnrollReceipt};
use crate::recognition::{self, FrameReport};
use presence_core::{Detect, Frame, ModelPaths, RecognitionModel};
use presence_store::{AttendanceEvent, IdentityStore, StoreError, StoreStats};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Engine tunables fixed at spawn time.
pub struct EngineConfig {
    /// Maximum classifier distance accepted as a match.
    pub distance_threshold: f32,
    /// Minimum usable samples required to commit an enrollment.
    pub min_enroll_samples: usize,
    /// Locations of the recognition model artifacts.
    pub model_paths: ModelPaths,
}

/// Messages sent from the handle to the engine thread.
enum EngineRequest {
    Recognize {
        frame: Frame,
        reply: oneshot::Sender<Result<FrameReport, StoreError>>,
    },
    Enroll {
        frames: Vec<Frame>,
        name: String,
        employee_id: String,
        reply: oneshot::Sender<Result<EnrollReceipt, EnrollError>>,
    },
    Stats {
        reply: oneshot::Sender<Result<StoreStats, StoreError>>,
    },
    RecentEvents {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<AttendanceEvent>, StoreError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run the recognition pipeline over one frame.
    pub async fn recognize(&self, frame: Frame) -> Result<FrameReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { frame, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::from)
    }

    /// Run a full enrollment over a captured frame sequence.
    pub async fn enroll(
        &self,
        frames: Vec<Frame>,
        name: String,
        employee_id: String,
    ) -> Result<EnrollReceipt, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                frames,
                name,
                employee_id,
                reply,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::from)
    }

    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stats { reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::from)
    }

    pub async fn recent_events(&self, limit: usize) -> Result<Vec<AttendanceEvent>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RecentEvents { limit, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::from)
    }
}

/// Spawn the engine on a dedicated OS thread and return its handle.
///
/// The thread exits when every handle is dropped.
pub fn spawn_engine(
    mut detector: Box<dyn Detect>,
    mut model: RecognitionModel,
    store: IdentityStore,
    config: EngineConfig,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!(
                trained = model.is_trained(),
                labels = model.label_count(),
                "engine thread started"
            );
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Recognize { frame, reply } => {
                        let result = recognition::process_frame(
                            detector.as_mut(),
                            &model,
                            &store,
                            config.distance_threshold,
                            &frame,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        frames,
                        name,
                        employee_id,
                        reply,
                    } => {
                        let result = enrollment::register(
                            detector.as_mut(),
                            &mut model,
                            &store,
                            &config.model_paths,
                            config.min_enroll_samples,
                            &frames,
                            &name,
                            &employee_id,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Stats { reply } => {
                        let _ = reply.send(store.stats());
                    }
                    EngineRequest::RecentEvents { limit, reply } => {
                        let _ = reply.send(store.recent_events(limit));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
