//! Pipeline error taxonomy.

use thiserror::Error;

/// Why a send failed. Each variant maps to a distinct pipeline stage so the
/// presentation layer can tell a rejected request from a transport failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The request was rejected before any transport activity.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The pre-script failed or called `fail(...)`. Post-script failures
    /// never reach this taxonomy; they ride in the event's `ScriptResult`.
    #[error("pre-script failed: {0}")]
    PreScript(String),

    /// The transport layer failed (connect, TLS, protocol, read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The redirect chain exceeded the configured bound.
    #[error("stopped after {limit} redirects")]
    TooManyRedirects { limit: usize },
}
