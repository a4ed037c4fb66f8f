//! `{{name}}` variable resolution over layered scopes.
//!
//! Precedence, highest first: temporary (single send) > environment >
//! collection globals. Resolution is a single left-to-right pass; resolved
//! values are never re-scanned, and unresolved tokens are left verbatim so
//! the user can see what failed to resolve.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid token regex"))
}

/// Layered variable scope used by the pipeline.
///
/// The temporary layer is cleared at the start of every send; pre/post
/// script `set(...)` writes land there.
#[derive(Clone, Debug, Default)]
pub struct VariableScopes {
    temporary: HashMap<String, String>,
    environment: HashMap<String, String>,
    globals: HashMap<String, String>,
}

impl VariableScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(variables: HashMap<String, String>) -> Self {
        VariableScopes {
            environment: variables,
            ..Self::default()
        }
    }

    pub fn set_temporary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.temporary.insert(key.into(), value.into());
    }

    pub fn set_environment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key.into(), value.into());
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.globals.insert(key.into(), value.into());
    }

    /// Drop all single-send variables.
    pub fn clear_temporary(&mut self) {
        self.temporary.clear();
    }

    /// Look up a name across the layers, highest precedence first.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.temporary
            .get(name)
            .or_else(|| self.environment.get(name))
            .or_else(|| self.globals.get(name))
            .map(String::as_str)
    }

    /// Substitute every `{{name}}` token in one pass. Substituted values are
    /// not re-scanned, so values containing `{{...}}` cannot trigger further
    /// expansion.
    pub fn resolve(&self, input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut last_end = 0;

        for caps in token_regex().captures_iter(input) {
            let token = caps.get(0).expect("match 0 always present");
            result.push_str(&input[last_end..token.start()]);
            match self.lookup(&caps[1]) {
                Some(value) => result.push_str(value),
                // Unresolved tokens stay verbatim.
                None => result.push_str(token.as_str()),
            }
            last_end = token.end();
        }

        result.push_str(&input[last_end..]);
        result
    }

    /// Names referenced in the input that no scope can resolve.
    pub fn find_unresolved(&self, input: &str) -> Vec<String> {
        token_regex()
            .captures_iter(input)
            .filter(|caps| self.lookup(&caps[1]).is_none())
            .map(|caps| caps[1].to_string())
            .collect()
    }
}
