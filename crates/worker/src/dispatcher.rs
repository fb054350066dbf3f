//! Render job dispatcher.
//!
//! Matches jobs with free backend slots. One-off jobs go straight to a
//! slot through [`Dispatcher::submit_job`]; requests that should wait for
//! capacity are queued with [`Dispatcher::queue_job`] and retried on every
//! tick. With auto-generation enabled, every free local slot is also kept
//! busy with default jobs.
//!
//! Only the head of the queue is examined per tick. A head whose renderer
//! type never becomes free blocks every entry behind it; callers that can
//! run anywhere should queue with [`RendererTypeRequest::AnyLocal`] or a
//! fallback pair.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use renderpool_backend::engine::{CompletionResult, RenderEngine};
use renderpool_backend::error::RenderError;
use renderpool_backend::events::PoolEvent;
use renderpool_backend::SharedPool;
use renderpool_core::{
    JobDescription, PoolError, RendererTypeRequest, SlotId, SlotInfo, SlotLease, SlotMatch,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::queue::{JobMode, PendingQueue, PendingRequest, RequestId, TargetId};

/// Default interval between dispatch ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Error returned by a host that cannot build a job.
pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// The collaborator that owns UI subjects: it turns queued requests into
/// concrete jobs and receives their results.
pub trait RenderHost: Send + Sync + 'static {
    /// Build the job for a queued request.
    fn build_job(&self, mode: JobMode, target: TargetId) -> Result<JobDescription, HostError>;

    /// Create a fresh placeholder subject for an auto-generated job.
    fn create_placeholder(&self) -> TargetId;

    /// The job auto-generation runs on a placeholder.
    fn default_job(&self, target: TargetId) -> Result<JobDescription, HostError>;

    /// Deliver a finished job's result.
    fn on_complete(&self, target: TargetId, mode: JobMode, result: CompletionResult);
}

/// Result of [`Dispatcher::submit_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Dispatched {
        slot_id: SlotId,
        correlation_token: Uuid,
    },
    /// Nothing was started; the callback was dropped uncalled.
    NoSlotAvailable,
}

/// What one [`Dispatcher::tick`] started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Queued request dispatched this tick, with its slot.
    pub dispatched: Option<(RequestId, SlotId)>,
    /// Slots that received an auto-generated job.
    pub auto_started: Vec<SlotId>,
}

/// Queue plus steady-state scheduler over a shared slot pool.
pub struct Dispatcher {
    engine: RenderEngine,
    host: Arc<dyn RenderHost>,
    queue: Mutex<PendingQueue>,
    auto_generate: AtomicBool,
    tick_interval: Duration,
}

impl Dispatcher {
    pub fn new(engine: RenderEngine, host: Arc<dyn RenderHost>) -> Self {
        Self {
            engine,
            host,
            queue: Mutex::new(PendingQueue::new()),
            auto_generate: AtomicBool::new(false),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    fn pool(&self) -> &SharedPool {
        self.engine.pool()
    }

    // ---- submission surface ----

    /// Start `job` immediately on the lowest free slot matching
    /// `requested`, or report that none is free.
    ///
    /// # Panics
    ///
    /// When called outside a Tokio runtime.
    pub fn submit_job<F>(
        &self,
        requested: RendererTypeRequest,
        job: JobDescription,
        on_complete: F,
    ) -> Result<SubmitOutcome, PoolError>
    where
        F: FnOnce(CompletionResult) + Send + 'static,
    {
        let Some(lease) = self.pool().lock().acquire_free(requested) else {
            tracing::debug!(requested = %requested, "No slot available for job");
            return Ok(SubmitOutcome::NoSlotAvailable);
        };

        let correlation_token = job.correlation_token();
        self.start(lease, job, on_complete)?;
        Ok(SubmitOutcome::Dispatched {
            slot_id: lease.slot_id,
            correlation_token,
        })
    }

    /// Queue a request to be built and dispatched once a matching slot
    /// frees up.
    pub fn queue_job(
        &self,
        mode: JobMode,
        target: TargetId,
        requested: RendererTypeRequest,
    ) -> RequestId {
        let mut queue = self.queue.lock();
        let id = queue.push(mode, target, requested);
        tracing::debug!(
            request_id = id,
            target_id = target,
            ?mode,
            requested = %requested,
            queue_len = queue.len(),
            "Render request queued",
        );
        id
    }

    /// Remove a queued request. No-op once it has been dispatched.
    pub fn cancel(&self, id: RequestId) -> bool {
        let removed = self.queue.lock().cancel(id);
        if removed {
            tracing::debug!(request_id = id, "Queued render request cancelled");
        }
        removed
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Snapshot of the queue in dispatch order.
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn set_auto_generate(&self, enabled: bool) {
        self.auto_generate.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "Auto-generation toggled");
    }

    pub fn auto_generate(&self) -> bool {
        self.auto_generate.load(Ordering::SeqCst)
    }

    /// Replace every slot with `slots`. Jobs still running on the old
    /// slots finish, but their results are dropped.
    pub fn reset_pool(&self, slots: Vec<SlotInfo>) -> Result<Vec<SlotId>, PoolError> {
        let (generation, invalidated_jobs, ids) = {
            let mut pool = self.pool().lock();
            let invalidated_jobs = pool.remove_all();
            let ids = slots
                .into_iter()
                .map(|info| pool.add_slot(info))
                .collect::<Result<Vec<_>, _>>()?;
            (pool.generation(), invalidated_jobs, ids)
        };

        self.engine.emit(PoolEvent::PoolReset {
            generation,
            invalidated_jobs,
        });
        Ok(ids)
    }

    // ---- scheduling ----

    /// One scheduling pass: try the queue head, then feed auto-generation.
    ///
    /// Jobs are spawned on the current Tokio runtime. Outside a runtime the
    /// pass is skipped and the queue is left untouched.
    pub fn tick(&self) -> TickReport {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!("Dispatch tick outside a Tokio runtime, skipping");
            return TickReport::default();
        }

        let mut report = TickReport {
            dispatched: self.dispatch_head(),
            ..Default::default()
        };
        if self.auto_generate() {
            report.auto_started = self.fill_free_local_slots();
        }
        report
    }

    /// Run [`tick`](Self::tick) on a fixed interval, and early whenever a
    /// slot is released, until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events = self.engine.subscribe();

        tracing::info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Render dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(queue_len = self.queue_len(), "Render dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
                event = events.recv() => match event {
                    Ok(PoolEvent::SlotReleased { .. }) => {
                        self.tick();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Dispatcher lagged behind pool events");
                        self.tick();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    // ---- private helpers ----

    /// Dispatch the queue head if a qualifying slot is free.
    fn dispatch_head(&self) -> Option<(RequestId, SlotId)> {
        let (request, lease) = {
            let mut queue = self.queue.lock();
            let head = queue.head()?;
            let mut pool = self.pool().lock();

            let lease = match pool.get_free_slot(head.requested, true)? {
                SlotMatch::Free(id) => pool.acquire(id).ok()?,
                SlotMatch::Busy(id) => {
                    tracing::trace!(
                        request_id = head.id,
                        slot_id = id,
                        "Queue head waiting for busy slot",
                    );
                    return None;
                }
            };
            (queue.pop_head()?, lease)
        };

        let job = match self.host.build_job(request.mode, request.target) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(
                    request_id = request.id,
                    target_id = request.target,
                    error = %e,
                    "Host could not build queued job, dropping request",
                );
                self.abandon(lease, request.target, request.mode, e.to_string());
                return None;
            }
        };

        let host = Arc::clone(&self.host);
        let (target, mode) = (request.target, request.mode);
        match self.start(lease, job, move |result| host.on_complete(target, mode, result)) {
            Ok(()) => {
                tracing::info!(
                    request_id = request.id,
                    slot_id = lease.slot_id,
                    waited_ms = (chrono::Utc::now() - request.queued_at).num_milliseconds(),
                    "Queued render request dispatched",
                );
                Some((request.id, lease.slot_id))
            }
            Err(e) => {
                tracing::warn!(
                    request_id = request.id,
                    slot_id = lease.slot_id,
                    error = %e,
                    "Dispatch failed, request kept at queue head",
                );
                self.queue.lock().push_front(request);
                None
            }
        }
    }

    /// Start a default job on every free local slot.
    fn fill_free_local_slots(&self) -> Vec<SlotId> {
        let free = self.pool().lock().free_local_slots();
        let mut started = Vec::with_capacity(free.len());

        for slot_id in free {
            let Ok(lease) = self.pool().lock().acquire(slot_id) else {
                continue;
            };

            let target = self.host.create_placeholder();
            let job = match self.host.default_job(target) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(
                        slot_id,
                        target_id = target,
                        error = %e,
                        "Host could not build default job",
                    );
                    self.abandon(lease, target, JobMode::Generate, e.to_string());
                    continue;
                }
            };

            let host = Arc::clone(&self.host);
            let callback = move |result| host.on_complete(target, JobMode::Generate, result);
            match self.start(lease, job, callback) {
                Ok(()) => started.push(slot_id),
                Err(e) => {
                    tracing::error!(slot_id, error = %e, "Auto-generate dispatch failed");
                    self.abandon(lease, target, JobMode::Generate, e.to_string());
                }
            }
        }

        started
    }

    /// Give back a slot whose job never started and report the failure to
    /// the host.
    fn abandon(&self, lease: SlotLease, target: TargetId, mode: JobMode, reason: String) {
        let slot_name = {
            let mut pool = self.pool().lock();
            let name = pool
                .slot(lease.slot_id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|_| format!("slot {}", lease.slot_id));
            pool.release(lease);
            name
        };

        let result =
            CompletionResult::not_started(lease.slot_id, slot_name, RenderError::NotStarted(reason));
        let host = &self.host;
        if std::panic::catch_unwind(AssertUnwindSafe(|| host.on_complete(target, mode, result)))
            .is_err()
        {
            tracing::error!(target_id = target, "Completion callback panicked");
        }
    }

    /// Hand an acquired slot to the engine, giving the slot back if the
    /// engine refuses it.
    fn start<F>(&self, lease: SlotLease, job: JobDescription, on_complete: F) -> Result<(), PoolError>
    where
        F: FnOnce(CompletionResult) + Send + 'static,
    {
        match self.engine.submit_leased(lease, job, on_complete) {
            Ok(_handle) => Ok(()),
            Err(e) => {
                self.pool().lock().release(lease);
                Err(e)
            }
        }
    }
}
