//! Server-Sent Events executor and incremental stream parser.

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::debug;

use crate::models::{PreparedRequest, ResponseEvent};
use crate::pipeline::PipelineError;
use crate::transport::EventPipe;

pub async fn execute(
    client: reqwest::Client,
    prepared: PreparedRequest,
    mut pipe: EventPipe,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut req_builder = client.get(&prepared.url).header("Accept", "text/event-stream");
    for (key, value) in &prepared.headers {
        req_builder = req_builder.header(key, value);
    }
    if let Some(value) = prepared.auth.header_value() {
        req_builder = req_builder.header("Authorization", value);
    }

    let result = tokio::select! {
        biased;
        _ = &mut cancel_rx => return,
        result = req_builder.send() => result,
    };

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            pipe.emit(ResponseEvent::Failed {
                error: PipelineError::Transport(format!("Connection failed: {}", e)),
            });
            return;
        }
    };

    let headers: Vec<(String, String)> = resp
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    pipe.emit(ResponseEvent::Opened {
        status: resp.status().as_u16(),
        headers,
    });

    stream_events(resp, &mut pipe, cancel_rx).await;
}

/// Read an open event-stream response until it ends or is cancelled.
/// Also entered by the HTTP executor when a response turns out to be an
/// event stream.
pub(crate) async fn stream_events(
    resp: reqwest::Response,
    pipe: &mut EventPipe,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut stream = resp.bytes_stream();
    let mut parser = SseParser::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut cancel_rx => return,

            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.push(&bytes) {
                            pipe.emit(ResponseEvent::Message {
                                payload: event.data,
                                event_type: event.event_type,
                                event_id: event.id,
                                received_at: Utc::now(),
                            });
                        }
                    }
                    Some(Err(e)) => {
                        pipe.emit(ResponseEvent::Failed {
                            error: PipelineError::Transport(format!("Stream error: {}", e)),
                        });
                        return;
                    }
                    None => {
                        pipe.emit(ResponseEvent::Closed {
                            reason: String::from("stream ended"),
                            body: None,
                        });
                        return;
                    }
                }
            }
        }
    }
}

/// One dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub data: String,
    pub event_type: Option<String>,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser.
///
/// Bytes arrive in arbitrary chunks; complete lines are processed as they
/// appear and a blank line dispatches the accumulated event. The last seen
/// id sticks across events, matching the protocol's last-event-id buffer.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    event_type: Option<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else {
                self.process_line(line);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) {
        // Comment line, used by servers as a keep-alive.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => match value.parse::<u64>() {
                // Reconnection is not attempted; the hint is only logged.
                Ok(ms) => debug!(retry_ms = ms, "Server sent a retry hint"),
                Err(_) => debug!(value, "Ignoring unparseable retry field"),
            },
            _ => debug!(field, "Ignoring unknown event-stream field"),
        }
    }

    /// Blank line reached: emit if any data accumulated, otherwise reset
    /// the event type silently.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = self.event_type.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseEvent {
            data,
            event_type,
            id: self.id.clone(),
        })
    }
}
