//! HTTP executor with manual redirect handling.
//!
//! Redirects are followed here rather than inside reqwest so the hop count
//! is bounded by configuration and the `Authorization` header can be
//! dropped on cross-origin hops. A response that announces itself as
//! `text/event-stream` is handed to the SSE reader mid-flight, whatever
//! transport the request was sent as.

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Url;
use tokio::sync::oneshot;
use tracing::debug;

use crate::models::{HttpMethod, PreparedRequest, RequestBody, ResponseEvent};
use crate::pipeline::PipelineError;
use crate::transport::{sse, EventPipe};

pub async fn execute(
    client: reqwest::Client,
    prepared: PreparedRequest,
    max_redirects: usize,
    mut pipe: EventPipe,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let origin = match Url::parse(&prepared.url) {
        Ok(url) => url,
        Err(e) => {
            pipe.emit(ResponseEvent::Failed {
                error: PipelineError::Transport(format!("Invalid URL: {}", e)),
            });
            return;
        }
    };

    let mut url = origin.clone();
    let mut method = prepared.method;
    let mut hops = 0usize;

    loop {
        let drop_sensitive = !same_origin(&origin, &url);
        let request = build_request(&client, &prepared, url.clone(), method, drop_sensitive);

        let result = tokio::select! {
            biased;
            _ = &mut cancel_rx => return,
            result = request.send() => result,
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                pipe.emit(ResponseEvent::Failed {
                    error: map_reqwest_error(e),
                });
                return;
            }
        };

        let status = resp.status();
        if status.is_redirection() {
            if let Some(location) = resp
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            {
                hops += 1;
                if hops > max_redirects {
                    pipe.emit(ResponseEvent::Failed {
                        error: PipelineError::TooManyRedirects {
                            limit: max_redirects,
                        },
                    });
                    return;
                }

                // Relative Location is resolved against the current URL.
                let next = match url.join(location) {
                    Ok(next) => next,
                    Err(e) => {
                        pipe.emit(ResponseEvent::Failed {
                            error: PipelineError::Transport(format!(
                                "Bad redirect location '{}': {}",
                                location, e
                            )),
                        });
                        return;
                    }
                };

                debug!(hop = hops, from = %url, to = %next, "Following redirect");
                method = redirect_method(status.as_u16(), method);
                url = next;
                continue;
            }
            // 3xx without Location is treated as the final response.
        }

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
        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        pipe.emit(ResponseEvent::Opened {
            status: status.as_u16(),
            headers,
        });

        if is_event_stream {
            // The server answered with an event stream; switch to streaming
            // delivery instead of buffering a body that never ends.
            sse::stream_events(resp, &mut pipe, cancel_rx).await;
            return;
        }

        let body = tokio::select! {
            biased;
            _ = &mut cancel_rx => return,
            body = resp.text() => body,
        };
        match body {
            Ok(body) => {
                pipe.emit(ResponseEvent::Closed {
                    reason: String::from("complete"),
                    body: Some(format_body(body)),
                });
            }
            Err(e) => {
                pipe.emit(ResponseEvent::Failed {
                    error: PipelineError::Transport(format!("Error reading body: {}", e)),
                });
            }
        }
        return;
    }
}

fn build_request(
    client: &reqwest::Client,
    prepared: &PreparedRequest,
    url: Url,
    method: HttpMethod,
    drop_sensitive: bool,
) -> reqwest::RequestBuilder {
    let mut req_builder = client.request(to_reqwest_method(method), url);

    for (key, value) in &prepared.headers {
        if drop_sensitive && key.eq_ignore_ascii_case("authorization") {
            continue;
        }
        req_builder = req_builder.header(key, value);
    }

    if !drop_sensitive {
        if let Some(value) = prepared.auth.header_value() {
            req_builder = req_builder.header("Authorization", value);
        }
    }

    if method.has_body() && !prepared.body.is_empty() {
        req_builder = match &prepared.body {
            RequestBody::None => req_builder,
            RequestBody::Raw { content_type, text } => req_builder
                .header(CONTENT_TYPE, content_type)
                .body(text.clone()),
            RequestBody::FormUrlEncoded { fields } => {
                let pairs: Vec<(String, String)> = fields
                    .iter()
                    .map(|f| (f.key.clone(), f.value.clone()))
                    .collect();
                req_builder.form(&pairs)
            }
            // The form is rebuilt per redirect hop, so text-only parts are
            // always re-sendable.
            RequestBody::Multipart { parts } => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut text_part = reqwest::multipart::Part::text(part.value.clone());
                    if let Some(filename) = &part.filename {
                        text_part = text_part.file_name(filename.clone());
                    }
                    if let Some(content_type) = &part.content_type {
                        if let Ok(typed) = text_part.mime_str(content_type) {
                            text_part = typed;
                        } else {
                            text_part = reqwest::multipart::Part::text(part.value.clone());
                        }
                    }
                    form = form.part(part.name.clone(), text_part);
                }
                req_builder.multipart(form)
            }
        };
    }

    req_builder
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::GET => reqwest::Method::GET,
        HttpMethod::POST => reqwest::Method::POST,
        HttpMethod::PUT => reqwest::Method::PUT,
        HttpMethod::PATCH => reqwest::Method::PATCH,
        HttpMethod::DELETE => reqwest::Method::DELETE,
    }
}

/// Method rewriting across a redirect hop: 303 always becomes GET, and
/// the legacy 301/302 statuses demote POST to GET the way browsers do.
fn redirect_method(status: u16, method: HttpMethod) -> HttpMethod {
    match status {
        303 => HttpMethod::GET,
        301 | 302 if method == HttpMethod::POST => HttpMethod::GET,
        _ => method,
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn map_reqwest_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() {
        PipelineError::Transport(String::from("Request timed out"))
    } else if e.is_connect() {
        PipelineError::Transport(format!("Connection failed: {}", e))
    } else {
        PipelineError::Transport(format!("Request failed: {}", e))
    }
}

/// Pretty-print JSON bodies; anything else passes through untouched.
pub(crate) fn format_body(body: String) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
        serde_json::to_string_pretty(&json).unwrap_or(body)
    } else {
        body
    }
}
