//! Application constants
//!
//! Centralized location for magic strings and configuration defaults.

/// Default URL for new HTTP requests
pub const DEFAULT_HTTP_URL: &str = "https://httpbin.org/get";

/// Redirect chain bound for the HTTP executor
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// TCP/TLS connect timeout in seconds. A total request timeout would kill
/// long-lived SSE streams, so only the connect phase is bounded.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of history entries retained
pub const MAX_HISTORY: usize = 50;

/// File name for persisted history inside the config dir
pub const HISTORY_FILE: &str = "history.yaml";
