//! Transport executors and their shared plumbing.
//!
//! Each executor runs on its own task, reads an immutable
//! [`PreparedRequest`](crate::models::PreparedRequest) and reports back
//! exclusively through an [`EventPipe`].

pub mod http;
pub mod sse;
pub mod websocket;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::constants::CONNECT_TIMEOUT_SECS;
use crate::messages::TransportEvent;
use crate::models::{PreparedRequest, ResponseEvent};
use crate::scripting::{ResponseSnapshot, ScriptHost, ScriptResult};
use crate::variables::VariableScopes;

/// Create the shared HTTP client. Redirects are handled manually by the
/// HTTP executor, and only the connect phase is bounded so long-lived
/// streams are never cut off by a total request timeout.
pub fn create_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// One-way event channel from a transport task to the orchestrator.
///
/// Runs the post-script against every payload-bearing event before it goes
/// up, and goes silent the moment the connection is cancelled so a dying
/// task cannot emit anything after the user moved on.
pub struct EventPipe {
    connection_id: u64,
    cancelled: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<TransportEvent>,
    scripts: Arc<dyn ScriptHost>,
    /// Scope snapshot taken at dispatch; post-script writes are applied
    /// locally so later events in the same stream see them.
    scopes: VariableScopes,
    prepared: PreparedRequest,
    /// Status from the `Opened` event, exposed to post-scripts.
    status: Option<u16>,
}

impl EventPipe {
    pub fn new(
        connection_id: u64,
        cancelled: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<TransportEvent>,
        scripts: Arc<dyn ScriptHost>,
        scopes: VariableScopes,
        prepared: PreparedRequest,
    ) -> Self {
        EventPipe {
            connection_id,
            cancelled,
            tx,
            scripts,
            scopes,
            prepared,
            status: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Report an event. Payload-bearing events get a post-script run first;
    /// a cancelled connection swallows everything.
    pub fn emit(&mut self, event: ResponseEvent) {
        if self.is_cancelled() {
            return;
        }

        if let ResponseEvent::Opened { status, .. } = &event {
            self.status = Some(*status);
        }

        let script = match event.payload() {
            Some(payload) if !self.prepared.post_script.trim().is_empty() => {
                let snapshot = ResponseSnapshot::new(self.status, payload);
                let result = self.scripts.run_post(&self.prepared, &snapshot, &self.scopes);
                for (name, value) in &result.set_variables {
                    self.scopes.set_temporary(name.clone(), value.clone());
                }
                result
            }
            _ => ScriptResult::success(),
        };

        let _ = self.tx.send(TransportEvent {
            connection_id: self.connection_id,
            event,
            script,
        });
    }
}
