//! Message types for inter-layer communication in the actor-based architecture.
//!
//! This module defines the messages that flow between callers, the pipeline
//! orchestrator and the transport tasks.

pub mod pipeline;

pub use pipeline::{PipelineCommand, TerminalState, TransportEvent};
