//! Backend slot registry and allocation policy.
//!
//! [`SlotPool`] is the authoritative table of render backends. Finding a
//! candidate ([`SlotPool::get_free_slot`]) never mutates state; committing
//! to it ([`SlotPool::acquire`]) marks the slot busy and hands out a
//! [`SlotLease`] that must be given back through [`SlotPool::release`].
//!
//! Every reset through [`SlotPool::remove_all`] bumps the pool generation,
//! so leases taken before the reset are recognisably stale and their late
//! results can be dropped instead of delivered.

use serde::Serialize;

use crate::error::PoolError;
use crate::renderer::{RendererType, RendererTypeRequest};
use crate::types::{Generation, SlotId};

/// Registration record for one backend, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Display name used in logs and user-facing error messages.
    /// Defaults to the endpoint when absent.
    pub name: Option<String>,
    /// Base URL, e.g. `http://127.0.0.1:7860`.
    pub endpoint: String,
    pub renderer_type: RendererType,
    pub is_local: bool,
    /// Overrides the renderer's default render path when set.
    pub render_path: Option<String>,
}

impl SlotInfo {
    pub fn new(endpoint: impl Into<String>, renderer_type: RendererType, is_local: bool) -> Self {
        Self {
            name: None,
            endpoint: endpoint.into(),
            renderer_type,
            is_local,
            render_path: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_render_path(mut self, path: impl Into<String>) -> Self {
        self.render_path = Some(path.into());
        self
    }
}

/// One logical render worker executing at most one job at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSlot {
    pub id: SlotId,
    pub name: String,
    pub renderer_type: RendererType,
    pub is_busy: bool,
    pub is_active: bool,
    pub is_local: bool,
    pub endpoint: String,
    pub render_path: Option<String>,
}

/// Proof that a job was bound to `slot_id` during `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotLease {
    pub slot_id: SlotId,
    pub generation: Generation,
}

/// Result of an allocation scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMatch {
    /// A qualifying slot that is idle right now.
    Free(SlotId),
    /// Only returned by busy-fallback scans: the lowest qualifying slot,
    /// which is currently running another job. Callers wait for it;
    /// [`SlotPool::acquire`] refuses to double-book it.
    Busy(SlotId),
}

impl SlotMatch {
    pub fn slot_id(&self) -> SlotId {
        match *self {
            Self::Free(id) | Self::Busy(id) => id,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free(_))
    }
}

/// The backend slot table.
#[derive(Debug, Default)]
pub struct SlotPool {
    /// Kept sorted by ascending `id` (slots are only ever appended).
    slots: Vec<BackendSlot>,
    next_id: SlotId,
    generation: Generation,
}

impl SlotPool {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- registration ----

    /// Append a backend with a fresh sequential ID.
    pub fn add_slot(&mut self, info: SlotInfo) -> Result<SlotId, PoolError> {
        let endpoint = validate_endpoint(&info.endpoint)?;

        let id = self.next_id;
        self.next_id += 1;

        let name = info
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| endpoint.clone());

        tracing::info!(
            slot_id = id,
            name = %name,
            renderer_type = %info.renderer_type,
            is_local = info.is_local,
            "Backend slot registered",
        );

        self.slots.push(BackendSlot {
            id,
            name,
            renderer_type: info.renderer_type,
            is_busy: false,
            is_active: true,
            is_local: info.is_local,
            endpoint,
            render_path: info.render_path,
        });

        Ok(id)
    }

    /// Drop every slot and start a new generation.
    ///
    /// Returns how many slots were busy; their jobs keep running but their
    /// leases are now stale. IDs are not reused afterwards.
    pub fn remove_all(&mut self) -> usize {
        let busy = self.busy_count();
        self.slots.clear();
        self.generation += 1;

        tracing::info!(
            generation = self.generation,
            invalidated_jobs = busy,
            "Backend slot pool reset",
        );

        busy
    }

    // ---- state ----

    pub fn is_busy(&self, id: SlotId) -> Result<bool, PoolError> {
        Ok(self.slot(id)?.is_busy)
    }

    /// Raw busy setter. Prefer [`acquire`](Self::acquire) /
    /// [`release`](Self::release), which enforce the one-job-per-slot
    /// contract.
    pub fn set_busy(&mut self, id: SlotId, busy: bool) -> Result<(), PoolError> {
        self.slot_mut(id)?.is_busy = busy;
        Ok(())
    }

    /// Operator (de)activation. Inactive slots are never allocated; a job
    /// already running on the slot is unaffected.
    pub fn set_active(&mut self, id: SlotId, active: bool) -> Result<(), PoolError> {
        let slot = self.slot_mut(id)?;
        slot.is_active = active;
        tracing::info!(slot_id = id, active, "Backend slot activation changed");
        Ok(())
    }

    // ---- allocation ----

    /// Find the lowest-ID active slot satisfying `request`.
    ///
    /// With `allow_busy_fallback`, a busy qualifying slot is reported as
    /// [`SlotMatch::Busy`] when no idle one exists. `None` means no slot is
    /// available, which is an expected outcome.
    pub fn get_free_slot(
        &self,
        request: RendererTypeRequest,
        allow_busy_fallback: bool,
    ) -> Option<SlotMatch> {
        if let Some(id) = self.scan(request, true) {
            return Some(SlotMatch::Free(id));
        }
        if allow_busy_fallback {
            return self.scan(request, false).map(SlotMatch::Busy);
        }
        None
    }

    /// Commit to a slot: mark it busy and return the lease.
    pub fn acquire(&mut self, id: SlotId) -> Result<SlotLease, PoolError> {
        let generation = self.generation;
        let slot = self.slot_mut(id)?;
        if !slot.is_active {
            return Err(PoolError::InactiveSlot(id));
        }
        if slot.is_busy {
            return Err(PoolError::SlotBusy(id));
        }
        slot.is_busy = true;
        Ok(SlotLease {
            slot_id: id,
            generation,
        })
    }

    /// Peek and take in one step: acquire the lowest free slot matching
    /// `request`, if any.
    pub fn acquire_free(&mut self, request: RendererTypeRequest) -> Option<SlotLease> {
        let id = self.scan(request, true)?;
        self.acquire(id).ok()
    }

    /// Return a slot to the free state.
    ///
    /// Returns `true` only for the call that actually flipped busy to free.
    /// Repeated releases and releases of stale leases are no-ops.
    pub fn release(&mut self, lease: SlotLease) -> bool {
        if lease.generation != self.generation {
            return false;
        }
        match self.slot_mut(lease.slot_id) {
            Ok(slot) if slot.is_busy => {
                slot.is_busy = false;
                true
            }
            _ => false,
        }
    }

    /// Whether the lease still refers to a live, busy slot of the
    /// current generation.
    pub fn holds(&self, lease: &SlotLease) -> bool {
        lease.generation == self.generation
            && self.slot(lease.slot_id).is_ok_and(|s| s.is_busy)
    }

    // ---- accessors ----

    pub fn slot(&self, id: SlotId) -> Result<&BackendSlot, PoolError> {
        self.slots
            .binary_search_by_key(&id, |s| s.id)
            .map(|idx| &self.slots[idx])
            .map_err(|_| PoolError::InvalidSlot(id))
    }

    pub fn slots(&self) -> &[BackendSlot] {
        &self.slots
    }

    /// IDs of every active, idle local slot in ascending order.
    pub fn free_local_slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|s| s.is_local && s.is_active && !s.is_busy)
            .map(|s| s.id)
            .collect()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_busy).count()
    }

    // ---- private helpers ----

    fn scan(&self, request: RendererTypeRequest, require_free: bool) -> Option<SlotId> {
        self.slots
            .iter()
            .find(|s| {
                s.is_active
                    && (!require_free || !s.is_busy)
                    && request.accepts(s.renderer_type, s.is_local)
            })
            .map(|s| s.id)
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut BackendSlot, PoolError> {
        match self.slots.binary_search_by_key(&id, |s| s.id) {
            Ok(idx) => Ok(&mut self.slots[idx]),
            Err(_) => Err(PoolError::InvalidSlot(id)),
        }
    }
}

/// Check an endpoint URL and strip any trailing slash.
fn validate_endpoint(endpoint: &str) -> Result<String, PoolError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(PoolError::Configuration(
            "Backend endpoint must not be empty".to_string(),
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(PoolError::Configuration(format!(
            "Backend endpoint must be an http(s) URL: \"{trimmed}\""
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
