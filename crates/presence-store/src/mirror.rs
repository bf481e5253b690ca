//! Best-effort remote mirror for attendance events.
//!
//! Events are queued after a successful local insert and pushed by a
//! dedicated worker thread. A confirmed 2xx response flips the event's
//! `synced` flag; any failure is logged and the event dropped, with no
//! automatic retry. The outcome never reaches the caller of
//! `log_attendance`.

use crate::store;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Remote mirror settings: where to push and, optionally, what bearer
/// credential to present.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

/// One attendance event queued for the remote store.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OutboundEvent {
    #[serde(skip)]
    pub event_id: i64,
    pub user_id: i64,
    pub name: String,
    pub timestamp: String,
}

/// Start the mirror worker thread and return its queue sender.
pub(crate) fn spawn(
    config: MirrorConfig,
    conn: Arc<Mutex<Connection>>,
) -> UnboundedSender<OutboundEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();

    std::thread::Builder::new()
        .name("presence-mirror".into())
        .spawn(move || {
            // No explicit timeout: the transport's own defaults apply.
            let client = match reqwest::blocking::Client::builder().build() {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "mirror disabled: failed to build HTTP client");
                    return;
                }
            };

            while let Some(event) = rx.blocking_recv() {
                push_event(&client, &config, &conn, &event);
            }
            tracing::debug!("mirror thread exiting");
        })
        .expect("failed to spawn mirror thread");

    tx
}

fn push_event(
    client: &reqwest::blocking::Client,
    config: &MirrorConfig,
    conn: &Mutex<Connection>,
    event: &OutboundEvent,
) {
    let mut request = client.post(&config.endpoint).json(event);
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }

    match request.send() {
        Ok(resp) if resp.status().is_success() => {
            if let Err(e) = store::mark_synced(conn, event.event_id) {
                tracing::warn!(
                    error = %e,
                    event_id = event.event_id,
                    "remote push confirmed but synced flag not updated"
                );
            } else {
                tracing::debug!(event_id = event.event_id, "event mirrored");
            }
        }
        Ok(resp) => tracing::warn!(
            status = %resp.status(),
            event_id = event.event_id,
            "remote mirror rejected event"
        ),
        Err(e) => tracing::warn!(
            error = %e,
            event_id = event.event_id,
            "remote mirror push failed"
        ),
    }
}
