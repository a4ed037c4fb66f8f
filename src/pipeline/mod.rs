//! Request execution pipeline.
//!
//! A send flows through fixed stages: resolve variables, validate, run the
//! pre-script (which may mutate the request), re-resolve, dispatch to the
//! transport matching the request's protocol, then relay every response
//! event (with its post-script outcome) to the presentation sink and record
//! a summary in history when the connection ends.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod sink;

pub use error::PipelineError;
pub use orchestrator::{PipelineHandle, PipelineOrchestrator};
pub use sink::{HistoryStore, NullHistoryStore, PresentationSink};
