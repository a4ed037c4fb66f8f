//! Pipeline messages - communication between callers, the orchestrator and
//! the transport tasks.

use crate::models::{RequestModel, ResponseEvent};
use crate::scripting::ScriptResult;

/// Commands sent to the pipeline orchestrator.
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Execute a request. The id was allocated by the handle that sent this.
    Send { id: u64, model: RequestModel },
    /// Cancel the send with the given connection id.
    Cancel { id: u64 },
    /// Send a text frame over the current WebSocket connection, if any.
    SendText { text: String },
    /// Shut the orchestrator down, cancelling any in-flight send.
    Shutdown,
}

/// One response event as reported by a transport task.
///
/// Carries the connection id captured when the send started; the
/// orchestrator discards events whose id no longer matches the current
/// connection.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub connection_id: u64,
    pub event: ResponseEvent,
    /// Post-script outcome for this event. Trivially successful for events
    /// that carry no payload.
    pub script: ScriptResult,
}

impl TransportEvent {
    /// Whether no more events will follow for this connection.
    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}

/// How a connection ended, as reported to the presentation sink.
/// Cancellation is reported separately through
/// [`on_cancelled`](crate::pipeline::PresentationSink::on_cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// The transport closed normally.
    Completed,
    /// The pipeline or transport failed.
    Failed,
}
