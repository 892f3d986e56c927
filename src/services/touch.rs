//! Best-effort `last_used_at` tracking.
//!
//! Query handlers enqueue; a single worker drains against the host pool.
//! The queue is bounded and the enqueue side never blocks: under load,
//! updates are dropped, which the semantics of `last_used_at` tolerate.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::store::MetadataStore;

const QUEUE_CAPACITY: usize = 1024;

static SENDER: OnceLock<mpsc::Sender<(Uuid, DateTime<Utc>)>> = OnceLock::new();

/// Spawn the drain worker. Call once at startup; later calls are no-ops.
pub fn spawn(pool: PgPool) {
    let (sender, mut receiver) = mpsc::channel(QUEUE_CAPACITY);
    if SENDER.set(sender).is_err() {
        return;
    }
    tokio::spawn(async move {
        let store = MetadataStore::new(pool);
        while let Some((token_id, when)) = receiver.recv().await {
            if let Err(err) = store.touch_token(token_id, when).await {
                warn!(%token_id, error = %err, "failed to update last_used_at");
            }
        }
    });
}

/// Record a token use. Never blocks; silently drops when the queue is full
/// or the worker was never started.
pub fn record_use(token_id: Uuid) {
    if let Some(sender) = SENDER.get() {
        if sender.try_send((token_id, Utc::now())).is_err() {
            debug!(%token_id, "touch queue full, dropping update");
        }
    }
}
