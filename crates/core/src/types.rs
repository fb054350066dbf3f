/// Stable identifier of a backend slot.
///
/// Assigned sequentially by [`SlotPool::add_slot`](crate::pool::SlotPool::add_slot)
/// and never reused for the lifetime of the process.
pub type SlotId = u32;

/// Pool-wide generation counter, bumped every time the slot table is reset.
pub type Generation = u64;
