/// Per-job failure delivered through the completion callback.
///
/// These never propagate as `Err` out of the engine: every job ends in a
/// [`CompletionResult`](crate::engine::CompletionResult).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Network failure, timeout or non-2xx HTTP status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Well-formed response whose `images` array was empty.
    #[error("Backend returned no images")]
    EmptyResult,

    /// Malformed response envelope or undecodable image payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The job never reached a backend: the host could not build it or
    /// the slot was lost before hand-off.
    #[error("Job not started: {0}")]
    NotStarted(String),
}
