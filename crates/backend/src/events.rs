//! Platform events emitted by the render engine and dispatcher.
//!
//! Subscribers (UI bridges, the dispatcher's wake-up loop) receive these
//! over a [`tokio::sync::broadcast`] channel.

use renderpool_core::{Generation, SlotId};
use serde::Serialize;
use uuid::Uuid;

/// A platform-level event about slot or job state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PoolEvent {
    /// A job was bound to a slot and its request is in flight.
    JobStarted {
        slot_id: SlotId,
        correlation_token: Uuid,
    },

    /// A slot went from busy back to free.
    SlotReleased {
        slot_id: SlotId,
        generation: Generation,
    },

    /// A job finished with a decoded image.
    JobCompleted {
        slot_id: SlotId,
        correlation_token: Uuid,
        width: u32,
        height: u32,
    },

    /// A job finished with an error.
    JobFailed {
        slot_id: SlotId,
        correlation_token: Uuid,
        /// Human-readable error description.
        error: String,
    },

    /// A response arrived for a job whose slot was removed by a pool reset.
    StaleCompletionDropped {
        slot_id: SlotId,
        generation: Generation,
        correlation_token: Uuid,
    },

    /// The slot table was cleared and rebuilt.
    PoolReset {
        generation: Generation,
        invalidated_jobs: usize,
    },
}
