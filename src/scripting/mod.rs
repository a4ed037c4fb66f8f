//! Pre/post execution scripting.
//!
//! The pipeline only knows the narrow [`ScriptHost`] boundary; the default
//! implementation is a small line-oriented command DSL
//! ([`CommandScriptHost`]), but anything that can produce a
//! [`ScriptResult`] plugs in.

pub mod host;
pub mod parser;

pub use host::{CommandScriptHost, ResponseSnapshot};

use serde::{Deserialize, Serialize};

use crate::models::PreparedRequest;
use crate::variables::VariableScopes;

/// Outcome of a single `assert(...)` in a script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    /// The condition text, used as the assertion's name.
    pub name: String,
    pub passed: bool,
    /// Failure message; empty when the assertion passed.
    pub message: String,
}

/// Result of running a script.
///
/// Pre-scripts mutate the request through `set_headers`/`set_params` and
/// stash values through `set_variables`; post-scripts may only annotate
/// (their header/param writes are ignored by the orchestrator).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    pub assertions: Vec<AssertionOutcome>,
    pub error: Option<String>,
    pub set_variables: Vec<(String, String)>,
    pub set_headers: Vec<(String, String)>,
    pub set_params: Vec<(String, String)>,
    pub logs: Vec<String>,
}

impl ScriptResult {
    pub fn success() -> Self {
        ScriptResult {
            success: true,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ScriptResult {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Number of failed assertions.
    pub fn failed_assertions(&self) -> usize {
        self.assertions.iter().filter(|a| !a.passed).count()
    }
}

/// Boundary to user-supplied pre/post execution logic.
///
/// Both hooks run synchronously inside the task that invokes them and must
/// therefore be cheap or willing to block that task only.
pub trait ScriptHost: Send + Sync {
    /// Run the request's pre-script. `success == false` aborts the send
    /// before any transport activity.
    fn run_pre(&self, prepared: &PreparedRequest, scopes: &VariableScopes) -> ScriptResult;

    /// Run the request's post-script against one response event. Failures
    /// are recorded alongside the event but never close the connection.
    fn run_post(
        &self,
        prepared: &PreparedRequest,
        response: &ResponseSnapshot,
        scopes: &VariableScopes,
    ) -> ScriptResult;
}
