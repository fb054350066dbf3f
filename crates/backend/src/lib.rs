//! Render backend client library.
//!
//! Provides the HTTP API wrapper for render servers, decoding of the
//! base64 image envelopes they return, the [`engine::RenderEngine`] that
//! runs one job per acquired slot, and the platform events it emits.

use std::sync::Arc;

use parking_lot::Mutex;
use renderpool_core::SlotPool;

pub mod api;
pub mod decode;
pub mod engine;
pub mod error;
pub mod events;

/// Slot table shared between the dispatcher and in-flight jobs.
///
/// Every pool operation is synchronous; the lock is never held across an
/// `.await` or while a completion callback runs.
pub type SharedPool = Arc<Mutex<SlotPool>>;

/// Wrap a pool for sharing.
pub fn shared_pool(pool: SlotPool) -> SharedPool {
    Arc::new(Mutex::new(pool))
}
