//! Default [`ScriptHost`] implementation evaluating the command DSL.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::parser::{parse_script, ScriptCommand};
use super::{AssertionOutcome, ScriptHost, ScriptResult};
use crate::models::PreparedRequest;
use crate::variables::VariableScopes;

/// The response view a post-script evaluates against. Exposed in the DSL
/// as `{{$status}}` and `{{$body}}`.
#[derive(Clone, Debug, Default)]
pub struct ResponseSnapshot {
    pub status: Option<u16>,
    pub body: String,
}

impl ResponseSnapshot {
    pub fn new(status: Option<u16>, body: impl Into<String>) -> Self {
        ResponseSnapshot {
            status,
            body: body.into(),
        }
    }
}

fn script_token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{(\$?\w+)\}\}").expect("valid token regex"))
}

/// Script host evaluating the line-oriented command DSL.
#[derive(Debug, Default)]
pub struct CommandScriptHost;

impl CommandScriptHost {
    pub fn new() -> Self {
        Self
    }

    fn run(
        &self,
        source: &str,
        scopes: &VariableScopes,
        response: Option<&ResponseSnapshot>,
    ) -> ScriptResult {
        if source.trim().is_empty() {
            return ScriptResult::success();
        }

        let commands = match parse_script(source) {
            Ok(commands) => commands,
            Err(e) => return ScriptResult::error(e.to_string()),
        };

        let mut result = ScriptResult::success();
        // Variables set earlier in the same script are visible to later lines.
        let mut locals: HashMap<String, String> = HashMap::new();

        for command in commands {
            match command {
                ScriptCommand::SetVariable { name, value } => {
                    let value = interpolate(&value, scopes, &locals, response);
                    locals.insert(name.clone(), value.clone());
                    result.set_variables.push((name, value));
                }
                ScriptCommand::SetHeader { name, value } => {
                    let value = interpolate(&value, scopes, &locals, response);
                    result.set_headers.push((name, value));
                }
                ScriptCommand::SetParam { name, value } => {
                    let value = interpolate(&value, scopes, &locals, response);
                    result.set_params.push((name, value));
                }
                ScriptCommand::Log { message } => {
                    result
                        .logs
                        .push(interpolate(&message, scopes, &locals, response));
                }
                ScriptCommand::Assert { condition, message } => {
                    let passed = evaluate_condition(&condition, scopes, &locals, response);
                    let failure_message = if passed {
                        String::new()
                    } else {
                        message.unwrap_or_else(|| format!("assertion failed: {}", condition))
                    };
                    if !passed {
                        result.success = false;
                        if result.error.is_none() {
                            result.error = Some(failure_message.clone());
                        }
                    }
                    result.assertions.push(AssertionOutcome {
                        name: condition,
                        passed,
                        message: failure_message,
                    });
                }
                ScriptCommand::Fail { message } => {
                    result.success = false;
                    result.error = Some(interpolate(&message, scopes, &locals, response));
                    break;
                }
            }
        }

        result
    }
}

impl ScriptHost for CommandScriptHost {
    fn run_pre(&self, prepared: &PreparedRequest, scopes: &VariableScopes) -> ScriptResult {
        self.run(&prepared.pre_script, scopes, None)
    }

    fn run_post(
        &self,
        prepared: &PreparedRequest,
        response: &ResponseSnapshot,
        scopes: &VariableScopes,
    ) -> ScriptResult {
        self.run(&prepared.post_script, scopes, Some(response))
    }
}

/// Substitute `{{name}}` and the `{{$status}}`/`{{$body}}` specials.
/// Script-local variables shadow the pipeline scopes.
fn interpolate(
    value: &str,
    scopes: &VariableScopes,
    locals: &HashMap<String, String>,
    response: Option<&ResponseSnapshot>,
) -> String {
    let mut result = String::with_capacity(value.len());
    let mut last_end = 0;

    for caps in script_token_regex().captures_iter(value) {
        let token = caps.get(0).expect("match 0 always present");
        let name = &caps[1];
        result.push_str(&value[last_end..token.start()]);

        let resolved = match name {
            "$status" => response
                .and_then(|r| r.status)
                .map(|s| s.to_string()),
            "$body" => response.map(|r| r.body.clone()),
            other => locals
                .get(other)
                .cloned()
                .or_else(|| scopes.lookup(other).map(String::from)),
        };

        match resolved {
            Some(v) => result.push_str(&v),
            None => result.push_str(token.as_str()),
        }
        last_end = token.end();
    }

    result.push_str(&value[last_end..]);
    result
}

fn evaluate_condition(
    condition: &str,
    scopes: &VariableScopes,
    locals: &HashMap<String, String>,
    response: Option<&ResponseSnapshot>,
) -> bool {
    let condition = condition.trim();

    let resolve = |side: &str| interpolate(side.trim(), scopes, locals, response);

    if let Some((left, right)) = condition.split_once("==") {
        return resolve(left) == resolve(right);
    }
    if let Some((left, right)) = condition.split_once("!=") {
        return resolve(left) != resolve(right);
    }
    if let Some((left, right)) = condition.split_once(">=") {
        return compare_numeric(&resolve(left), &resolve(right), |a, b| a >= b);
    }
    if let Some((left, right)) = condition.split_once("<=") {
        return compare_numeric(&resolve(left), &resolve(right), |a, b| a <= b);
    }
    if let Some((left, right)) = condition.split_once('>') {
        return compare_numeric(&resolve(left), &resolve(right), |a, b| a > b);
    }
    if let Some((left, right)) = condition.split_once('<') {
        return compare_numeric(&resolve(left), &resolve(right), |a, b| a < b);
    }

    // Truthy check
    let resolved = resolve(condition);
    !resolved.is_empty() && resolved != "false" && resolved != "0"
}

fn compare_numeric<F>(left: &str, right: &str, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => cmp(l, r),
        _ => false,
    }
}
