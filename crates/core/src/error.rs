use crate::types::SlotId;

/// Caller contract violations raised by the slot pool.
///
/// "No slot available" is deliberately absent: it is an ordinary `None`
/// from [`SlotPool::get_free_slot`](crate::pool::SlotPool::get_free_slot).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid slot: {0}")]
    InvalidSlot(SlotId),

    #[error("Slot {0} is already busy")]
    SlotBusy(SlotId),

    #[error("Slot {0} is inactive")]
    InactiveSlot(SlotId),

    #[error("Slot {0} was not acquired before submission")]
    SlotNotAcquired(SlotId),
}

/// Rejected job payloads.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job parameters: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("{0} must be a finite number")]
    NonFinite(&'static str),

    #[error("Failed to encode job body: {0}")]
    Encode(#[from] serde_json::Error),
}
