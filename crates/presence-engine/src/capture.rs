//! Frame snapshot cell and the enrollment capture sampler.
//!
//! The presentation shell's display loop and the enrollment sampler share
//! the latest camera frame through a [`FrameCell`]: writers publish owned
//! frames, readers get owned copies. Neither side ever holds a reference
//! into the other's buffer.

use presence_core::Frame;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera stopped during capture")]
    CameraStopped,
}

#[derive(Default)]
struct CellState {
    latest: Option<Frame>,
    closed: bool,
}

/// Copy-on-read cell holding the most recent camera frame.
#[derive(Clone, Default)]
pub struct FrameCell {
    inner: Arc<Mutex<CellState>>,
}

impl FrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the latest frame, replacing any previous one.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        if !state.closed {
            state.latest = Some(frame);
        }
    }

    /// An owned copy of the latest frame, if any has been published.
    pub fn snapshot(&self) -> Option<Frame> {
        self.lock().latest.clone()
    }

    /// Mark the camera as stopped. Subsequent publishes are dropped and any
    /// in-flight capture session aborts.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.latest = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CellState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sample up to `count` snapshots at a fixed interval for an enrollment
/// session. If the camera stops mid-session the partial result is
/// discarded and the session aborts.
pub fn collect_session(
    cell: &FrameCell,
    count: usize,
    interval: Duration,
) -> Result<Vec<Frame>, CaptureError> {
    let mut frames = Vec::with_capacity(count);

    for i in 0..count {
        if cell.is_closed() {
            tracing::warn!(collected = frames.len(), "capture aborted: camera stopped");
            return Err(CaptureError::CameraStopped);
        }
        if let Some(frame) = cell.snapshot() {
            frames.push(frame);
        }
        if i + 1 < count {
            std::thread::sleep(interval);
        }
    }

    tracing::debug!(collected = frames.len(), requested = count, "capture session complete");
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> Frame {
        Frame::from_gray(vec![value; 16], 4, 4).unwrap()
    }

    #[test]
    fn snapshot_is_an_independent_copy() {
        let cell = FrameCell::new();
        cell.publish(frame(10));

        let mut copy = cell.snapshot().unwrap();
        copy.data[0] = 99;

        assert_eq!(cell.snapshot().unwrap().data[0], 10);
    }

    #[test]
    fn snapshot_empty_before_first_publish() {
        let cell = FrameCell::new();
        assert!(cell.snapshot().is_none());
    }

    #[test]
    fn publish_replaces_previous_frame() {
        let cell = FrameCell::new();
        cell.publish(frame(1));
        cell.publish(frame(2));
        assert_eq!(cell.snapshot().unwrap().data[0], 2);
    }

    #[test]
    fn close_drops_frame_and_rejects_publishes() {
        let cell = FrameCell::new();
        cell.publish(frame(1));
        cell.close();
        assert!(cell.snapshot().is_none());
        cell.publish(frame(2));
        assert!(cell.snapshot().is_none());
    }

    #[test]
    fn session_collects_requested_count() {
        let cell = FrameCell::new();
        cell.publish(frame(7));
        let frames = collect_session(&cell, 10, Duration::from_millis(1)).unwrap();
        assert_eq!(frames.len(), 10);
    }

    #[test]
    fn session_skips_missing_frames() {
        let cell = FrameCell::new();
        let frames = collect_session(&cell, 5, Duration::from_millis(1)).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn session_aborts_when_camera_stops() {
        let cell = FrameCell::new();
        cell.publish(frame(7));

        let closer = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cell.close();
            })
        };

        let result = collect_session(&cell, 1000, Duration::from_millis(2));
        closer.join().unwrap();
        assert!(matches!(result, Err(CaptureError::CameraStopped)));
    }
}
