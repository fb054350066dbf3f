//! FIFO retry queue for requests that found no free slot.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use renderpool_core::RendererTypeRequest;

/// Identifier handed back by [`PendingQueue::push`], used for cancellation.
pub type RequestId = u64;

/// Opaque handle to the UI subject (picture, canvas region) a job renders
/// into. Owned by the host; the dispatcher only passes it back.
pub type TargetId = u64;

/// What a queued request asks the host to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobMode {
    /// Fresh image from the target's prompt.
    Generate,
    /// Repaint the masked region of the target.
    Inpaint,
    /// Re-render the whole target with a new seed.
    Variation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub mode: JobMode,
    pub target: TargetId,
    pub requested: RendererTypeRequest,
    pub queued_at: DateTime<Utc>,
}

/// Strict FIFO of pending requests.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingRequest>,
    next_id: RequestId,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request at the tail.
    pub fn push(
        &mut self,
        mode: JobMode,
        target: TargetId,
        requested: RendererTypeRequest,
    ) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(PendingRequest {
            id,
            mode,
            target,
            requested,
            queued_at: Utc::now(),
        });
        id
    }

    pub fn head(&self) -> Option<&PendingRequest> {
        self.entries.front()
    }

    pub fn pop_head(&mut self) -> Option<PendingRequest> {
        self.entries.pop_front()
    }

    /// Put a popped request back in front of everything else, keeping its
    /// ID and original queue time.
    pub fn push_front(&mut self, request: PendingRequest) {
        self.entries.push_front(request);
    }

    /// Remove a queued request. Returns `false` if it was already
    /// dispatched, cancelled, or never existed.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANY: RendererTypeRequest = RendererTypeRequest::AnyLocal;

    #[test]
    fn fifo_order() {
        let mut q = PendingQueue::new();
        let a = q.push(JobMode::Generate, 10, ANY);
        let b = q.push(JobMode::Inpaint, 11, ANY);
        assert_eq!(q.pop_head().map(|e| e.id), Some(a));
        assert_eq!(q.pop_head().map(|e| e.id), Some(b));
        assert!(q.pop_head().is_none());
    }

    #[test]
    fn cancel_middle_entry_keeps_order() {
        let mut q = PendingQueue::new();
        let a = q.push(JobMode::Generate, 1, ANY);
        let b = q.push(JobMode::Generate, 2, ANY);
        let c = q.push(JobMode::Generate, 3, ANY);

        assert!(q.cancel(b));
        assert!(!q.cancel(b));
        let ids: Vec<_> = q.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn cancel_after_pop_is_noop() {
        let mut q = PendingQueue::new();
        let a = q.push(JobMode::Variation, 1, ANY);
        q.pop_head();
        assert!(!q.cancel(a));
    }

    #[test]
    fn push_front_restores_head() {
        let mut q = PendingQueue::new();
        let a = q.push(JobMode::Inpaint, 1, ANY);
        let b = q.push(JobMode::Inpaint, 2, ANY);

        let head = q.pop_head().unwrap();
        let queued_at = head.queued_at;
        q.push_front(head);

        assert_eq!(q.head().map(|e| (e.id, e.queued_at)), Some((a, queued_at)));
        let ids: Vec<_> = q.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(q.cancel(a));
    }

    #[test]
    fn ids_not_reused() {
        let mut q = PendingQueue::new();
        let a = q.push(JobMode::Generate, 1, ANY);
        q.pop_head();
        let b = q.push(JobMode::Generate, 1, ANY);
        assert_ne!(a, b);
    }
}
