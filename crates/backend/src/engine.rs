//! Job execution against an acquired backend slot.
//!
//! [`RenderEngine::submit`] spawns one task per job. The task performs the
//! HTTP round trip, validates and decodes the result, releases the slot and
//! then invokes the completion callback. The slot is released exactly once
//! on every exit path, including a panicking callback or a panic inside the
//! task, through [`ReleaseGuard`].
//!
//! The engine never marks a slot busy. Callers acquire first (see
//! [`SlotPool::acquire`](renderpool_core::SlotPool::acquire)), which is what
//! keeps two jobs off the same slot.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use renderpool_core::{BackendSlot, JobDescription, PoolError, SlotId, SlotLease};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::{self, RenderBackend};
use crate::decode::{self, DecodedImage};
use crate::error::RenderError;
use crate::events::PoolEvent;
use crate::SharedPool;

/// Broadcast channel capacity for platform events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one job, handed to its completion callback.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub slot_id: SlotId,
    /// Display name of the backend, for user-facing messages.
    pub slot_name: String,
    pub correlation_token: Uuid,
    pub outcome: Result<DecodedImage, RenderError>,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

impl CompletionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&RenderError> {
        self.outcome.as_ref().err()
    }

    /// Failure for a job that never reached the backend. There is no job,
    /// so the correlation token is nil.
    pub fn not_started(slot_id: SlotId, slot_name: String, error: RenderError) -> Self {
        Self {
            slot_id,
            slot_name,
            correlation_token: Uuid::nil(),
            outcome: Err(error),
            elapsed: Duration::ZERO,
            finished_at: Utc::now(),
        }
    }

    /// Short message naming the backend and the failure, or `None` on
    /// success.
    pub fn user_message(&self) -> Option<String> {
        self.error().map(|e| format!("{}: {e}", self.slot_name))
    }
}

/// Executes render jobs on slots that the caller has already acquired.
///
/// Cheap to clone; clones share the pool, backend and event channel.
#[derive(Clone)]
pub struct RenderEngine {
    pool: SharedPool,
    backend: Arc<dyn RenderBackend>,
    event_tx: broadcast::Sender<PoolEvent>,
}

impl RenderEngine {
    pub fn new(pool: SharedPool, backend: Arc<dyn RenderBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pool,
            backend,
            event_tx,
        }
    }

    /// Subscribe to platform events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event on the engine's channel. Having no subscribers is
    /// not an error.
    pub fn emit(&self, event: PoolEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Run `job` on a slot the caller has already marked busy.
    ///
    /// Fails fast with [`PoolError::InvalidSlot`] for unknown IDs and
    /// [`PoolError::SlotNotAcquired`] when the slot is not busy. Transport
    /// and decode failures are delivered to `on_complete` instead.
    ///
    /// # Panics
    ///
    /// When called outside a Tokio runtime, since the job runs on a
    /// spawned task.
    pub fn submit<F>(
        &self,
        slot_id: SlotId,
        job: JobDescription,
        on_complete: F,
    ) -> Result<JoinHandle<()>, PoolError>
    where
        F: FnOnce(CompletionResult) + Send + 'static,
    {
        let generation = self.pool.lock().generation();
        self.submit_leased(
            SlotLease {
                slot_id,
                generation,
            },
            job,
            on_complete,
        )
    }

    /// Like [`submit`](Self::submit), binding the job to the exact lease
    /// returned by `acquire`.
    pub fn submit_leased<F>(
        &self,
        lease: SlotLease,
        job: JobDescription,
        on_complete: F,
    ) -> Result<JoinHandle<()>, PoolError>
    where
        F: FnOnce(CompletionResult) + Send + 'static,
    {
        let slot = {
            let pool = self.pool.lock();
            if lease.generation != pool.generation() {
                return Err(PoolError::InvalidSlot(lease.slot_id));
            }
            let slot = pool.slot(lease.slot_id)?;
            if !slot.is_busy {
                return Err(PoolError::SlotNotAcquired(lease.slot_id));
            }
            slot.clone()
        };

        let url = api::render_url(&slot, job.payload().has_init_image());
        let token = job.correlation_token();

        tracing::info!(
            slot_id = slot.id,
            generation = lease.generation,
            correlation_token = %token,
            url = %url,
            "Render job submitted",
        );
        self.emit(PoolEvent::JobStarted {
            slot_id: slot.id,
            correlation_token: token,
        });

        let guard = ReleaseGuard {
            pool: Arc::clone(&self.pool),
            lease,
            event_tx: self.event_tx.clone(),
            done: false,
        };
        let backend = Arc::clone(&self.backend);
        let event_tx = self.event_tx.clone();
        let body = job.wire_body().clone();

        Ok(tokio::spawn(async move {
            run_job(backend, slot, url, body, token, guard, event_tx, on_complete).await;
        }))
    }
}

/// Body of a spawned job task.
#[allow(clippy::too_many_arguments)]
async fn run_job<F>(
    backend: Arc<dyn RenderBackend>,
    slot: BackendSlot,
    url: String,
    body: serde_json::Value,
    token: Uuid,
    mut guard: ReleaseGuard,
    event_tx: broadcast::Sender<PoolEvent>,
    on_complete: F,
) where
    F: FnOnce(CompletionResult) + Send + 'static,
{
    let started = Instant::now();
    let outcome = execute(backend.as_ref(), &url, &body).await;
    let elapsed = started.elapsed();

    if !guard.finish() {
        tracing::warn!(
            slot_id = slot.id,
            generation = guard.lease.generation,
            correlation_token = %token,
            "Dropping result for job on a removed slot",
        );
        let _ = event_tx.send(PoolEvent::StaleCompletionDropped {
            slot_id: slot.id,
            generation: guard.lease.generation,
            correlation_token: token,
        });
        return;
    }

    match &outcome {
        Ok(image) => {
            tracing::info!(
                slot_id = slot.id,
                correlation_token = %token,
                width = image.width(),
                height = image.height(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Render job completed",
            );
            let _ = event_tx.send(PoolEvent::JobCompleted {
                slot_id: slot.id,
                correlation_token: token,
                width: image.width(),
                height: image.height(),
            });
        }
        Err(e) => {
            tracing::warn!(
                slot_id = slot.id,
                slot_name = %slot.name,
                correlation_token = %token,
                error = %e,
                "Render job failed",
            );
            let _ = event_tx.send(PoolEvent::JobFailed {
                slot_id: slot.id,
                correlation_token: token,
                error: e.to_string(),
            });
        }
    }

    let result = CompletionResult {
        slot_id: slot.id,
        slot_name: slot.name,
        correlation_token: token,
        outcome,
        elapsed,
        finished_at: Utc::now(),
    };

    if std::panic::catch_unwind(AssertUnwindSafe(|| on_complete(result))).is_err() {
        tracing::error!(
            slot_id = slot.id,
            correlation_token = %token,
            "Completion callback panicked",
        );
    }
}

/// HTTP round trip, envelope validation and off-thread image decoding.
async fn execute(
    backend: &dyn RenderBackend,
    url: &str,
    body: &serde_json::Value,
) -> Result<DecodedImage, RenderError> {
    let text = backend
        .render(url, body)
        .await
        .map_err(|e| RenderError::Transport(e.to_string()))?;

    let payload = decode::first_image(&text)?;

    tokio::task::spawn_blocking(move || decode::decode_image(&payload))
        .await
        .map_err(|e| RenderError::Decode(format!("Decode task failed: {e}")))?
}

/// Releases the leased slot when finished or dropped, whichever happens
/// first.
struct ReleaseGuard {
    pool: SharedPool,
    lease: SlotLease,
    event_tx: broadcast::Sender<PoolEvent>,
    done: bool,
}

impl ReleaseGuard {
    /// Release the slot. Returns whether the lease still belonged to the
    /// current pool generation, i.e. whether the result may be delivered.
    fn finish(&mut self) -> bool {
        self.done = true;
        let (current, released) = {
            let mut pool = self.pool.lock();
            (
                pool.generation() == self.lease.generation,
                pool.release(self.lease),
            )
        };
        if released {
            tracing::debug!(slot_id = self.lease.slot_id, "Slot released");
            let _ = self.event_tx.send(PoolEvent::SlotReleased {
                slot_id: self.lease.slot_id,
                generation: self.lease.generation,
            });
        }
        current
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.done {
            self.finish();
        }
    }
}
