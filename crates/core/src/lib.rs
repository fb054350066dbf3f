//! Core types for the render backend pool.
//!
//! Holds the slot registry and allocation policy plus the job and error
//! types shared by the engine and dispatcher. Has no async or I/O
//! dependencies.

pub mod error;
pub mod job;
pub mod pool;
pub mod renderer;
pub mod types;

pub use error::{JobError, PoolError};
pub use job::{JobDescription, RenderRequest};
pub use pool::{BackendSlot, SlotInfo, SlotLease, SlotMatch, SlotPool};
pub use renderer::{RendererType, RendererTypeRequest};
pub use types::{Generation, SlotId};
