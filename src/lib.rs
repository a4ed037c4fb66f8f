//! # Waypost
//!
//! A scriptable API request pipeline for HTTP, WebSocket and SSE.
//!
//! ## Features
//! - HTTP methods: GET, POST, PUT, PATCH, DELETE
//! - Bounded manual redirect handling with cross-origin credential stripping
//! - WebSocket and Server-Sent Events transports
//! - Mid-flight upgrade when an HTTP response turns out to be an event stream
//! - `{{variable}}` resolution over layered scopes
//! - Pre-scripts that can mutate the outgoing request
//! - Post-scripts with assertions, run per response event
//! - Bounded, file-backed request history
//!
//! ## Architecture
//! Actor-based with channels:
//! - Pipeline orchestrator (single in-flight connection, id-tagged events)
//! - Transport tasks (Tokio) reporting through an event pipe
//! - Presentation and history via caller-supplied sinks

pub mod constants;
pub mod messages;
pub mod models;
pub mod pipeline;
pub mod scripting;
pub mod storage;
pub mod transport;
pub mod variables;

// Re-export commonly used types
pub use messages::{PipelineCommand, TerminalState, TransportEvent};
pub use models::{
    AuthType, HttpMethod, KeyValue, PreparedRequest, Protocol, RequestBody, RequestModel,
    ResponseEvent, ResponseSummary,
};
pub use pipeline::{
    HistoryStore, NullHistoryStore, PipelineError, PipelineHandle, PipelineOrchestrator,
    PresentationSink,
};
pub use scripting::{CommandScriptHost, ResponseSnapshot, ScriptHost, ScriptResult};
pub use storage::FileHistoryStore;
pub use variables::VariableScopes;
