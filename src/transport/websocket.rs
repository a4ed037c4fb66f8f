//! WebSocket executor - bidirectional connection driven by the pipeline.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::models::{PreparedRequest, ResponseEvent};
use crate::pipeline::PipelineError;
use crate::transport::EventPipe;

pub async fn connect(
    prepared: PreparedRequest,
    mut pipe: EventPipe,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let request = match build_handshake(&prepared) {
        Ok(request) => request,
        Err(message) => {
            pipe.emit(ResponseEvent::Failed {
                error: PipelineError::Transport(message),
            });
            return;
        }
    };

    let (ws_stream, response) = match connect_async(request).await {
        Ok(pair) => pair,
        Err(e) => {
            pipe.emit(ResponseEvent::Failed {
                error: PipelineError::Transport(format!("Connection failed: {}", e)),
            });
            return;
        }
    };

    let headers: Vec<(String, String)> = response
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
        status: response.status().as_u16(),
        headers,
    });

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = &mut cancel_rx => {
                let _ = write.close().await;
                pipe.emit(ResponseEvent::Closed {
                    reason: String::from("closed by user"),
                    body: None,
                });
                return;
            }

            Some(msg) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    pipe.emit(ResponseEvent::Failed {
                        error: PipelineError::Transport(format!("Send failed: {}", e)),
                    });
                    return;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        pipe.emit(ResponseEvent::message(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Binary frames are surfaced as a hex dump.
                        let hex = data.iter()
                            .map(|b| format!("{:02x}", b))
                            .collect::<Vec<_>>()
                            .join(" ");
                        pipe.emit(ResponseEvent::message(format!(
                            "[Binary: {} bytes]\n{}",
                            data.len(),
                            hex
                        )));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pong responses
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{}: {}", f.code, f.reason))
                            .unwrap_or_else(|| String::from("connection closed"));
                        pipe.emit(ResponseEvent::Closed { reason, body: None });
                        return;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        // Raw frame, ignore
                    }
                    Some(Err(e)) => {
                        pipe.emit(ResponseEvent::Failed {
                            error: PipelineError::Transport(format!("Receive error: {}", e)),
                        });
                        return;
                    }
                    None => {
                        debug!("WebSocket stream ended");
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

/// Build the handshake request: tungstenite supplies the upgrade headers,
/// the prepared request contributes its own headers and auth.
fn build_handshake(
    prepared: &PreparedRequest,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, String> {
    let mut request = prepared
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| format!("Invalid WebSocket URL: {}", e))?;

    for (key, value) in &prepared.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("Invalid header name '{}': {}", key, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("Invalid header value for '{}': {}", key, e))?;
        request.headers_mut().insert(name, value);
    }

    if let Some(value) = prepared.auth.header_value() {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| format!("Invalid Authorization value: {}", e))?;
        request.headers_mut().insert("Authorization", value);
    }

    Ok(request)
}
