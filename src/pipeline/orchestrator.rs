//! The pipeline orchestrator task.
//!
//! Owns the single in-flight connection and runs every send through the
//! same stages: resolve, validate, pre-script, re-resolve, dispatch to a
//! transport task, then relay transport events to the presentation sink and
//! append a summary to history on terminal events.
//!
//! Connection identity: every send gets a monotonically increasing id from
//! the [`PipelineHandle`]. Transport events carry the id they were spawned
//! with; the orchestrator drops events whose id no longer matches the
//! current connection, so a superseded or cancelled send can never leak a
//! late callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_MAX_REDIRECTS;
use crate::messages::{PipelineCommand, TerminalState, TransportEvent};
use crate::models::{PreparedRequest, Protocol, RequestModel, ResponseEvent, ResponseSummary};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::sink::{HistoryStore, PresentationSink};
use crate::scripting::{CommandScriptHost, ScriptHost};
use crate::transport::{self, EventPipe};
use crate::variables::VariableScopes;

/// Cheap, cloneable front door to a running orchestrator. Allocates
/// connection ids so callers learn the id of a send before any event
/// referencing it can arrive.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    cmd_tx: mpsc::UnboundedSender<PipelineCommand>,
    next_id: Arc<AtomicU64>,
}

impl PipelineHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = PipelineHandle {
            cmd_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, cmd_rx)
    }

    /// Queue a send and return its connection id.
    pub fn send(&self, model: RequestModel) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let _ = self.cmd_tx.send(PipelineCommand::Send { id, model });
        id
    }

    pub fn cancel(&self, id: u64) {
        let _ = self.cmd_tx.send(PipelineCommand::Cancel { id });
    }

    /// Send a text frame over the current WebSocket connection.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.cmd_tx.send(PipelineCommand::SendText { text: text.into() });
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::Shutdown);
    }
}

/// The request execution actor. Construct with [`PipelineOrchestrator::new`],
/// configure with the builder methods, then hand it a command receiver via
/// [`run`](Self::run) on a spawned task.
pub struct PipelineOrchestrator {
    client: reqwest::Client,
    sink: Box<dyn PresentationSink>,
    history: Box<dyn HistoryStore>,
    scripts: Arc<dyn ScriptHost>,
    scopes: VariableScopes,
    max_redirects: usize,
    current: Option<ExecutionContext>,
    tasks: JoinSet<()>,
}

impl PipelineOrchestrator {
    pub fn new(sink: Box<dyn PresentationSink>, history: Box<dyn HistoryStore>) -> Self {
        PipelineOrchestrator {
            client: transport::create_client(),
            sink,
            history,
            scripts: Arc::new(CommandScriptHost::new()),
            scopes: VariableScopes::new(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            current: None,
            tasks: JoinSet::new(),
        }
    }

    pub fn with_script_host(mut self, scripts: Arc<dyn ScriptHost>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_environment(mut self, variables: HashMap<String, String>) -> Self {
        self.scopes = VariableScopes::with_environment(variables);
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Main loop. Runs until a `Shutdown` command arrives or the command
    /// channel closes.
    pub async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<PipelineCommand>) {
        info!("Pipeline orchestrator started");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        loop {
            tokio::select! {
                biased;

                command = cmd_rx.recv() => {
                    match command {
                        Some(PipelineCommand::Send { id, model }) => {
                            self.handle_send(id, model, &event_tx);
                        }
                        Some(PipelineCommand::Cancel { id }) => {
                            self.handle_cancel(id);
                        }
                        Some(PipelineCommand::SendText { text }) => {
                            self.handle_send_text(text);
                        }
                        Some(PipelineCommand::Shutdown) | None => {
                            debug!("Pipeline orchestrator shutting down");
                            if let Some(mut ctx) = self.current.take() {
                                ctx.cancel();
                            }
                            break;
                        }
                    }
                }

                Some(event) = event_rx.recv() => {
                    self.handle_event(event);
                }

                Some(result) = self.tasks.join_next() => {
                    if let Err(e) = result {
                        if !e.is_cancelled() {
                            warn!("Transport task panicked: {}", e);
                        }
                    }
                }
            }
        }

        info!("Pipeline orchestrator stopped");
    }

    fn handle_send(
        &mut self,
        id: u64,
        model: RequestModel,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        // Temporary variables live for exactly one send.
        self.scopes.clear_temporary();

        let mut prepared = PreparedRequest::from_model(&model, &self.scopes);
        if let Err(error) = validate(&prepared) {
            self.reject(id, error);
            return;
        }

        if !prepared.pre_script.trim().is_empty() {
            let outcome = self.scripts.run_pre(&prepared, &self.scopes);
            for line in &outcome.logs {
                info!(connection_id = id, "pre-script: {}", line);
            }
            if !outcome.success {
                let message = outcome
                    .error
                    .unwrap_or_else(|| String::from("pre-script failed"));
                self.reject(id, PipelineError::PreScript(message));
                return;
            }

            // Apply script writes, then re-resolve so values set by the
            // script are visible in the request that actually goes out.
            for (name, value) in &outcome.set_variables {
                self.scopes.set_temporary(name.clone(), value.clone());
            }
            let mut mutated = model.clone();
            for (name, value) in &outcome.set_headers {
                mutated.set_header(name, value);
            }
            for (name, value) in &outcome.set_params {
                mutated.set_param(name, value);
            }
            prepared = PreparedRequest::from_model(&mutated, &self.scopes);
            if let Err(error) = validate(&prepared) {
                self.reject(id, error);
                return;
            }
        }

        // A new send supersedes the old connection without ceremony; stale
        // events are filtered by id.
        if let Some(mut old) = self.current.take() {
            debug!(
                old = old.connection_id,
                new = id,
                "Superseding in-flight connection"
            );
            old.cancel();
        }

        let mut ctx = ExecutionContext::new(id, prepared.clone());
        self.sink.on_prepared(&prepared);

        let (close_tx, close_rx) = oneshot::channel();
        ctx.set_close_channel(close_tx);

        let pipe = EventPipe::new(
            id,
            ctx.cancel_flag(),
            event_tx.clone(),
            Arc::clone(&self.scripts),
            self.scopes.clone(),
            prepared.clone(),
        );

        match prepared.protocol {
            Protocol::Http => {
                let client = self.client.clone();
                let max_redirects = self.max_redirects;
                self.tasks.spawn(async move {
                    transport::http::execute(client, prepared, max_redirects, pipe, close_rx)
                        .await;
                });
            }
            Protocol::Sse => {
                let client = self.client.clone();
                self.tasks.spawn(async move {
                    transport::sse::execute(client, prepared, pipe, close_rx).await;
                });
            }
            Protocol::WebSocket => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                ctx.set_outbound_channel(outbound_tx);
                self.tasks.spawn(async move {
                    transport::websocket::connect(prepared, pipe, outbound_rx, close_rx).await;
                });
            }
        }

        self.current = Some(ctx);
    }

    /// Terminate a send that never reached the transport. No transport task
    /// was spawned and nothing is recorded in history.
    fn reject(&mut self, id: u64, error: PipelineError) {
        warn!(connection_id = id, "Send rejected: {}", error);
        let event = ResponseEvent::Failed { error };
        self.sink.on_terminal(TerminalState::Failed, Some(&event));
    }

    fn handle_cancel(&mut self, id: u64) {
        match self.current.take() {
            Some(mut ctx) if ctx.connection_id == id => {
                ctx.cancel();
                info!(connection_id = id, "Send cancelled");
                self.sink.on_cancelled();
            }
            other => {
                debug!(connection_id = id, "Cancel for inactive connection ignored");
                self.current = other;
            }
        }
    }

    fn handle_send_text(&mut self, text: String) {
        match self.current.as_ref() {
            Some(ctx) if ctx.send_text(text) => {}
            _ => warn!("No active WebSocket connection for outbound message"),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        let Some(ctx) = self.current.as_mut() else {
            debug!(
                connection_id = event.connection_id,
                "Discarding event with no active connection"
            );
            return;
        };
        if event.connection_id != ctx.connection_id || ctx.is_cancelled() {
            debug!(
                connection_id = event.connection_id,
                current = ctx.connection_id,
                "Discarding stale event"
            );
            return;
        }

        // Post-script set(...) writes survive into later events of the same
        // connection and later sends against the same scopes.
        for (name, value) in &event.script.set_variables {
            self.scopes.set_temporary(name.clone(), value.clone());
        }
        for line in &event.script.logs {
            info!(connection_id = event.connection_id, "post-script: {}", line);
        }

        match &event.event {
            ResponseEvent::Opened { status, .. } => ctx.status = Some(*status),
            ResponseEvent::Message { .. } => ctx.message_count += 1,
            _ => {}
        }

        self.sink.on_event(&event.event, &event.script);

        if event.is_terminal() {
            let ctx = match self.current.take() {
                Some(ctx) => ctx,
                None => return,
            };

            let (state, body, error) = match &event.event {
                ResponseEvent::Closed { body, .. } => {
                    (TerminalState::Completed, body.clone(), None)
                }
                ResponseEvent::Failed { error } => {
                    (TerminalState::Failed, None, Some(error.to_string()))
                }
                _ => (TerminalState::Completed, None, None),
            };

            let summary = ResponseSummary {
                status: ctx.status,
                body,
                error,
                elapsed_ms: ctx.elapsed_ms(),
                message_count: ctx.message_count,
            };

            // History failures are logged but never surface to the sink.
            if let Err(e) = self.history.append(&ctx.prepared, &summary) {
                warn!("Failed to append history entry: {}", e);
            }

            self.sink.on_terminal(state, Some(&event.event));
        }
    }
}

/// Reject requests that cannot be dispatched: empty or unparseable URLs,
/// or a URL scheme outside the selected transport's family.
fn validate(prepared: &PreparedRequest) -> Result<(), PipelineError> {
    let url = prepared.url.trim();
    if url.is_empty() {
        return Err(PipelineError::Validation(String::from("URL is empty")));
    }
    if !prepared.protocol.accepts_scheme(url) {
        return Err(PipelineError::Validation(format!(
            "URL scheme does not match the {} transport",
            prepared.protocol.as_str()
        )));
    }
    reqwest::Url::parse(url)
        .map_err(|e| PipelineError::Validation(format!("invalid URL: {}", e)))?;
    Ok(())
}
