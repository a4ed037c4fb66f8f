//! Waypost - headless runner for the request pipeline.
//!
//! Usage: waypost <request.yaml> [environment.yaml]
//!
//! The request file is a YAML `RequestModel`; the optional environment file
//! is a flat map of variable names to values. HTTP and SSE requests run to
//! completion; WebSocket requests read outbound frames from stdin until the
//! connection closes.

use std::collections::HashMap;
use std::fs;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use waypost::{
    PipelineHandle, PipelineOrchestrator, PreparedRequest, PresentationSink, Protocol,
    RequestModel, ResponseEvent, ScriptResult, TerminalState,
};

/// Sink that prints pipeline callbacks to stdout and signals completion.
struct ConsoleSink {
    done_tx: mpsc::UnboundedSender<()>,
}

impl PresentationSink for ConsoleSink {
    fn on_prepared(&mut self, prepared: &PreparedRequest) {
        println!("> {} {}", prepared.method.as_str(), prepared.url);
    }

    fn on_event(&mut self, event: &ResponseEvent, script: &ScriptResult) {
        for line in event_lines(event, script) {
            println!("{}", line);
        }
    }

    fn on_terminal(&mut self, state: TerminalState, event: Option<&ResponseEvent>) {
        if let Some(line) = terminal_line(state, event) {
            eprintln!("{}", line);
        }
        let _ = self.done_tx.send(());
    }

    fn on_cancelled(&mut self) {
        println!("[cancelled]");
        let _ = self.done_tx.send(());
    }
}

fn event_lines(event: &ResponseEvent, script: &ScriptResult) -> Vec<String> {
    let mut lines = Vec::new();
    match event {
        ResponseEvent::Opened { status, .. } => lines.push(format!("< {}", status)),
        ResponseEvent::Message {
            payload,
            event_type,
            ..
        } => match event_type {
            Some(kind) => lines.push(format!("<< [{}] {}", kind, payload)),
            None => lines.push(format!("<< {}", payload)),
        },
        ResponseEvent::Closed {
            reason,
            body: Some(body),
        } => lines.push(format!("{}\n[{}]", body, reason)),
        ResponseEvent::Closed { reason, body: None } => lines.push(format!("[{}]", reason)),
        // Failures are reported once, at the terminal callback.
        ResponseEvent::Failed { .. } => {}
    }

    for assertion in &script.assertions {
        if assertion.passed {
            lines.push(format!("  PASS {}", assertion.name));
        } else {
            lines.push(format!("  FAIL {} ({})", assertion.name, assertion.message));
        }
    }
    lines
}

fn terminal_line(state: TerminalState, event: Option<&ResponseEvent>) -> Option<String> {
    match (state, event) {
        (TerminalState::Failed, Some(ResponseEvent::Failed { error })) => {
            Some(format!("error: {}", error))
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging to file
    let file_appender = tracing_appender::rolling::never(".", "waypost.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(request_path) = args.next() else {
        bail!("usage: waypost <request.yaml> [environment.yaml]");
    };

    let content = fs::read_to_string(&request_path)
        .with_context(|| format!("reading request file {}", request_path))?;
    let model: RequestModel =
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", request_path))?;

    let environment: HashMap<String, String> = match args.next() {
        Some(env_path) => {
            let content = fs::read_to_string(&env_path)
                .with_context(|| format!("reading environment file {}", env_path))?;
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", env_path))?
        }
        None => HashMap::new(),
    };

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let sink = ConsoleSink { done_tx };

    let orchestrator = PipelineOrchestrator::new(
        Box::new(sink),
        Box::new(waypost::FileHistoryStore::new()),
    )
    .with_environment(environment);

    let (handle, cmd_rx) = PipelineHandle::new();
    let orchestrator_task = tokio::spawn(orchestrator.run(cmd_rx));

    let protocol = model.protocol;
    let id = handle.send(model);

    if protocol == Protocol::WebSocket {
        pump_stdin(&handle, id, &mut done_rx).await;
    } else {
        let _ = done_rx.recv().await;
    }

    handle.shutdown();
    let _ = orchestrator_task.await;
    Ok(())
}

/// Forward stdin lines as outbound frames until the connection ends or
/// stdin closes. A closed stdin cancels the connection.
async fn pump_stdin(
    handle: &PipelineHandle,
    id: u64,
    done_rx: &mut mpsc::UnboundedReceiver<()>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = done_rx.recv() => return,
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => handle.send_text(text),
                    _ => {
                        handle.cancel(id);
                        let _ = done_rx.recv().await;
                        return;
                    }
                }
            }
        }
    }
}
