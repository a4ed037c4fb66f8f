//! Parser for the script command DSL.
//!
//! One command per line; `//` and `#` start comments. Supported commands:
//! - `set("name", "value")` - stash a temporary variable
//! - `setHeader("name", "value")` - set a request header (pre-script only)
//! - `setParam("name", "value")` - set a query parameter (pre-script only)
//! - `log("message")` - emit a log line
//! - `assert("lhs == rhs", "message")` - record an assertion
//! - `fail("message")` - abort with an error

use thiserror::Error;

/// A parsed script command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptCommand {
    SetVariable { name: String, value: String },
    SetHeader { name: String, value: String },
    SetParam { name: String, value: String },
    Log { message: String },
    Assert { condition: String, message: Option<String> },
    Fail { message: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid syntax at line {line}: {message}")]
    InvalidSyntax { line: usize, message: String },
    #[error("wrong arguments for {command}: expected {expected}")]
    BadArguments { command: String, expected: String },
}

/// Parse a script into commands, skipping blanks and comments.
pub fn parse_script(script: &str) -> Result<Vec<ScriptCommand>, ParseError> {
    let mut commands = Vec::new();

    for (line_num, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }
        commands.push(parse_line(line, line_num + 1)?);
    }

    Ok(commands)
}

fn parse_line(line: &str, line_num: usize) -> Result<ScriptCommand, ParseError> {
    let Some(paren_pos) = line.find('(') else {
        return Err(ParseError::InvalidSyntax {
            line: line_num,
            message: "expected '(' after command name".to_string(),
        });
    };

    let command_name = line[..paren_pos].trim();
    let args_str = line[paren_pos..].trim();

    if !args_str.ends_with(')') {
        return Err(ParseError::InvalidSyntax {
            line: line_num,
            message: "missing closing ')'".to_string(),
        });
    }

    let args = parse_arguments(&args_str[1..args_str.len() - 1]);

    let two_args = |command: &str| -> Result<(String, String), ParseError> {
        if args.len() != 2 {
            return Err(ParseError::BadArguments {
                command: command.to_string(),
                expected: "2 arguments (name, value)".to_string(),
            });
        }
        Ok((args[0].clone(), args[1].clone()))
    };

    match command_name {
        "set" | "setVariable" => {
            let (name, value) = two_args(command_name)?;
            Ok(ScriptCommand::SetVariable { name, value })
        }
        "setHeader" => {
            let (name, value) = two_args(command_name)?;
            Ok(ScriptCommand::SetHeader { name, value })
        }
        "setParam" | "setQueryParam" => {
            let (name, value) = two_args(command_name)?;
            Ok(ScriptCommand::SetParam { name, value })
        }
        "log" => {
            if args.is_empty() {
                return Err(ParseError::BadArguments {
                    command: command_name.to_string(),
                    expected: "1 argument (message)".to_string(),
                });
            }
            Ok(ScriptCommand::Log {
                message: args.join(", "),
            })
        }
        "assert" => {
            if args.is_empty() || args.len() > 2 {
                return Err(ParseError::BadArguments {
                    command: command_name.to_string(),
                    expected: "1-2 arguments (condition, message?)".to_string(),
                });
            }
            Ok(ScriptCommand::Assert {
                condition: args[0].clone(),
                message: args.get(1).cloned(),
            })
        }
        "fail" => Ok(ScriptCommand::Fail {
            message: args.first().cloned().unwrap_or_default(),
        }),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// Split an argument list on commas outside quotes and strip quoting.
fn parse_arguments(content: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';

    for c in content.chars() {
        match c {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if in_quotes && c == quote_char => in_quotes = false,
            ',' if !in_quotes => {
                args.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }

    if !content.trim().is_empty() {
        args.push(current.trim().to_string());
    }

    args
}
