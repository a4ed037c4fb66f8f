use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;
use crate::variables::VariableScopes;

/// HTTP Method enum
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
        }
    }

    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::POST | HttpMethod::PUT | HttpMethod::PATCH)
    }
}

/// Transport selector for a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    WebSocket,
    Sse,
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Http => "http",
            Protocol::WebSocket => "websocket",
            Protocol::Sse => "sse",
        }
    }

    /// Whether the URL belongs to this protocol's scheme family.
    pub fn accepts_scheme(&self, url: &str) -> bool {
        match self {
            Protocol::Http | Protocol::Sse => {
                url.starts_with("http://") || url.starts_with("https://")
            }
            Protocol::WebSocket => url.starts_with("ws://") || url.starts_with("wss://"),
        }
    }
}

/// A key/value entry (header or query param). Disabled entries are kept in
/// the model so they round-trip through storage, but never reach the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub enabled: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// A single part of a multipart body. Only text parts are supported;
/// file parts would have to be re-read on every redirect hop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultipartPart {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Typed request body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum RequestBody {
    #[default]
    None,
    Raw {
        #[serde(default = "default_content_type")]
        content_type: String,
        text: String,
    },
    #[serde(rename = "form")]
    FormUrlEncoded { fields: Vec<KeyValue> },
    Multipart { parts: Vec<MultipartPart> },
}

fn default_content_type() -> String {
    String::from("application/json")
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::None => true,
            RequestBody::Raw { text, .. } => text.is_empty(),
            RequestBody::FormUrlEncoded { fields } => fields.is_empty(),
            RequestBody::Multipart { parts } => parts.is_empty(),
        }
    }
}

/// Authentication type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum AuthType {
    #[default]
    None,
    Bearer(String),
    Basic {
        username: String,
        password: String,
    },
}

impl AuthType {
    /// Materialize the `Authorization` header value, if any.
    pub fn header_value(&self) -> Option<String> {
        match self {
            AuthType::None => None,
            AuthType::Bearer(token) => Some(format!("Bearer {}", token)),
            AuthType::Basic { username, password } => {
                let credentials = format!("{}:{}", username, password);
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                Some(format!("Basic {}", encoded))
            }
        }
    }
}

/// A single request as composed by the user. Built fresh per send and not
/// mutated concurrently; the pipeline works on a [`PreparedRequest`] snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestModel {
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    #[serde(default)]
    pub params: Vec<KeyValue>,
    #[serde(default)]
    pub body: RequestBody,
    #[serde(default)]
    pub auth: AuthType,
    /// Pre-execution script source; empty means disabled.
    #[serde(default)]
    pub pre_script: String,
    /// Post-execution script source, run once per response event.
    #[serde(default)]
    pub post_script: String,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Default for RequestModel {
    fn default() -> Self {
        use crate::constants::DEFAULT_HTTP_URL;
        RequestModel {
            name: String::from("New Request"),
            method: HttpMethod::GET,
            url: String::from(DEFAULT_HTTP_URL),
            headers: vec![
                KeyValue::new("Content-Type", "application/json"),
                KeyValue::new("Accept", "application/json"),
            ],
            params: Vec::new(),
            body: RequestBody::None,
            auth: AuthType::None,
            pre_script: String::new(),
            post_script: String::new(),
            protocol: Protocol::Http,
        }
    }
}

impl RequestModel {
    /// Replace (case-insensitively) or append a header entry.
    pub fn set_header(&mut self, key: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|h| h.key.eq_ignore_ascii_case(key))
        {
            Some(header) => {
                header.value = value.to_string();
                header.enabled = true;
            }
            None => self.headers.push(KeyValue::new(key, value)),
        }
    }

    /// Replace or append a query param entry.
    pub fn set_param(&mut self, key: &str, value: &str) {
        match self.params.iter_mut().find(|p| p.key == key) {
            Some(param) => {
                param.value = value.to_string();
                param.enabled = true;
            }
            None => self.params.push(KeyValue::new(key, value)),
        }
    }
}

/// Fully resolved, variable-substituted snapshot of a [`RequestModel`].
///
/// Frozen once the pre-script mutation window closes; transport executors
/// only ever read it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Enabled headers only, values resolved.
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub auth: AuthType,
    pub pre_script: String,
    pub post_script: String,
    pub protocol: Protocol,
    /// Identity of the materialized request, usable for idempotent re-use.
    pub cache_key: String,
}

impl PreparedRequest {
    /// Resolve a model against the given scopes: substitute variables in the
    /// URL, headers, params, body and auth fields, merge enabled params into
    /// the URL query string and drop disabled entries.
    pub fn from_model(model: &RequestModel, scopes: &VariableScopes) -> Self {
        let resolved_url = scopes.resolve(&model.url);
        let url = merge_params(&resolved_url, &model.params, scopes);

        let headers: Vec<(String, String)> = model
            .headers
            .iter()
            .filter(|h| h.enabled)
            .map(|h| (h.key.clone(), scopes.resolve(&h.value)))
            .collect();

        let body = match &model.body {
            RequestBody::None => RequestBody::None,
            RequestBody::Raw { content_type, text } => RequestBody::Raw {
                content_type: content_type.clone(),
                text: scopes.resolve(text),
            },
            RequestBody::FormUrlEncoded { fields } => RequestBody::FormUrlEncoded {
                fields: fields
                    .iter()
                    .filter(|f| f.enabled)
                    .map(|f| KeyValue::new(f.key.clone(), scopes.resolve(&f.value)))
                    .collect(),
            },
            RequestBody::Multipart { parts } => RequestBody::Multipart {
                parts: parts
                    .iter()
                    .map(|p| MultipartPart {
                        name: p.name.clone(),
                        value: scopes.resolve(&p.value),
                        filename: p.filename.clone(),
                        content_type: p.content_type.clone(),
                    })
                    .collect(),
            },
        };

        let auth = match &model.auth {
            AuthType::None => AuthType::None,
            AuthType::Bearer(token) => AuthType::Bearer(scopes.resolve(token)),
            AuthType::Basic { username, password } => AuthType::Basic {
                username: scopes.resolve(username),
                password: scopes.resolve(password),
            },
        };

        let cache_key = cache_key(model.method, &url, &headers, &body);

        PreparedRequest {
            method: model.method,
            url,
            headers,
            body,
            auth,
            pre_script: model.pre_script.clone(),
            post_script: model.post_script.clone(),
            protocol: model.protocol,
            cache_key,
        }
    }
}

/// Append enabled, resolved params to the URL query string.
fn merge_params(url: &str, params: &[KeyValue], scopes: &VariableScopes) -> String {
    let enabled: Vec<(String, String)> = params
        .iter()
        .filter(|p| p.enabled)
        .map(|p| (p.key.clone(), scopes.resolve(&p.value)))
        .collect();

    if enabled.is_empty() {
        return url.to_string();
    }

    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            {
                let mut pairs = parsed.query_pairs_mut();
                for (key, value) in &enabled {
                    pairs.append_pair(key, value);
                }
            }
            parsed.to_string()
        }
        // Leave malformed URLs alone; validation rejects them before dispatch.
        Err(_) => url.to_string(),
    }
}

fn cache_key(
    method: HttpMethod,
    url: &str,
    headers: &[(String, String)],
    body: &RequestBody,
) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    for (key, value) in headers {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    if let RequestBody::Raw { text, .. } = body {
        text.hash(&mut hasher);
    }
    format!("{}:{}:{:016x}", method.as_str(), url, hasher.finish())
}

/// A single transport outcome.
///
/// HTTP produces exactly one `Opened` followed by one terminal `Closed`
/// carrying the full body (or `Failed`). WebSocket/SSE may produce any
/// number of `Message` events between `Opened` and `Closed`/`Failed`.
#[derive(Clone, Debug)]
pub enum ResponseEvent {
    Opened {
        status: u16,
        headers: Vec<(String, String)>,
    },
    Message {
        payload: String,
        /// SSE event type, if any.
        event_type: Option<String>,
        /// SSE event id, if any.
        event_id: Option<String>,
        received_at: DateTime<Utc>,
    },
    Closed {
        reason: String,
        /// Full response body for HTTP; streams close without one.
        body: Option<String>,
    },
    Failed {
        error: PipelineError,
    },
}

impl ResponseEvent {
    pub fn message(payload: impl Into<String>) -> Self {
        ResponseEvent::Message {
            payload: payload.into(),
            event_type: None,
            event_id: None,
            received_at: Utc::now(),
        }
    }

    /// Whether no further events follow for this connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseEvent::Closed { .. } | ResponseEvent::Failed { .. }
        )
    }

    /// The payload a post-script sees as the response body, if any.
    pub fn payload(&self) -> Option<&str> {
        match self {
            ResponseEvent::Message { payload, .. } => Some(payload),
            ResponseEvent::Closed { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}

/// What [`HistoryStore::append`](crate::pipeline::HistoryStore::append)
/// records about a finished execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub status: Option<u16>,
    pub body: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// Streamed message count; zero for buffered HTTP.
    pub message_count: usize,
}

/// History entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub request: PreparedRequest,
    pub summary: ResponseSummary,
    pub timestamp: DateTime<Utc>,
}
