//! Outbound boundaries of the pipeline: presentation callbacks and history.

use crate::messages::TerminalState;
use crate::models::{PreparedRequest, ResponseEvent, ResponseSummary};
use crate::scripting::ScriptResult;

/// Receiver of pipeline callbacks, invoked from the orchestrator task.
///
/// Callbacks for a send only arrive while that send is still the current
/// connection; the orchestrator filters out anything stale, so implementors
/// never see events from a superseded or cancelled send.
pub trait PresentationSink: Send {
    /// The request was resolved, validated and (if present) pre-scripted.
    /// Fires once per send, before any transport activity.
    fn on_prepared(&mut self, prepared: &PreparedRequest);

    /// A response event arrived, with its post-script outcome.
    fn on_event(&mut self, event: &ResponseEvent, script: &ScriptResult);

    /// The connection reached a terminal state. `event` is the event that
    /// ended it; validation and pre-script rejections synthesize a `Failed`
    /// event since no transport ever ran.
    fn on_terminal(&mut self, state: TerminalState, event: Option<&ResponseEvent>);

    /// The user cancelled the current send.
    fn on_cancelled(&mut self);
}

/// Append-only record of finished executions.
pub trait HistoryStore: Send {
    fn append(&mut self, request: &PreparedRequest, summary: &ResponseSummary)
        -> anyhow::Result<()>;
}

/// History sink that drops everything. Useful for tests and one-off sends.
#[derive(Debug, Default)]
pub struct NullHistoryStore;

impl HistoryStore for NullHistoryStore {
    fn append(&mut self, _: &PreparedRequest, _: &ResponseSummary) -> anyhow::Result<()> {
        Ok(())
    }
}
