//! Console command encoding.
//!
//! The server reads one command per line from stdin and re-tokenizes it with
//! its own parser: whitespace separates tokens, double quotes group them and
//! `\"` escapes a quote. An unescaped `;` splits commands even inside quotes,
//! so every literal semicolon is replaced by U+037E (GREEK QUESTION MARK)
//! here and restored by the receiving resource.

use crate::error::{Error, Result};
use serde_json::Value;

/// Stand-in for `;` inside encoded arguments.
pub const SEMICOLON_SENTINEL: char = '\u{037e}';

/// Replaces every `;` with [`SEMICOLON_SENTINEL`]. All other characters,
/// unescaped quotes included, are left as they are.
pub fn sanitize_arg_string(input: &str) -> String {
    input.replace(';', &SEMICOLON_SENTINEL.to_string())
}

/// Like [`sanitize_arg_string`], for dynamically typed input.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for anything that is not a JSON string.
pub fn sanitize_arg(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(sanitize_arg_string(s)),
        other => Err(Error::Protocol(format!(
            "expected a string argument, got {}",
            json_type_name(other)
        ))),
    }
}

/// Encodes a single argument as one whitespace-safe token.
///
/// Strings are written as their JSON representation (already quoted).
/// Anything else is serialized to JSON, its quotes escaped and the whole
/// thing wrapped in one more pair of quotes.
///
/// ```
/// use fxrunner::transport::command::encode_arg;
/// use serde_json::json;
///
/// assert_eq!(encode_arg(&json!("abc")), r#""abc""#);
/// assert_eq!(encode_arg(&json!("te\"st")), r#""te\"st""#);
/// assert_eq!(encode_arg(&json!({"a": 1})), r#""{\"a\":1}""#);
/// assert_eq!(encode_arg(&json!(";")), "\"\u{037e}\"");
/// ```
pub fn encode_arg(value: &Value) -> String {
    // Serializing a serde_json::Value cannot fail.
    let json = value.to_string();
    let token = match value {
        Value::String(_) => json,
        _ => format!("\"{}\"", json.replace('"', "\\\"")),
    };
    sanitize_arg_string(&token)
}

/// Whether `name` is a non-empty run of `[A-Za-z0-9_]`.
pub fn is_valid_command_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Builds the stdin line (without the trailing newline) for a command.
///
/// ```
/// use fxrunner::transport::command::encode_command;
/// use serde_json::json;
///
/// let line = encode_command("set", &[json!("txAdmin-locale"), json!("en")]).unwrap();
/// assert_eq!(line, r#"set "txAdmin-locale" "en""#);
/// ```
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `name` is empty or contains anything other
/// than word characters.
pub fn encode_command(name: &str, args: &[Value]) -> Result<String> {
    if name.is_empty() {
        return Err(Error::Protocol("command name must not be empty".to_string()));
    }
    if !is_valid_command_name(name) {
        return Err(Error::Protocol(format!(
            "invalid command name '{}': only [A-Za-z0-9_] is allowed",
            name
        )));
    }

    let encoded: Vec<String> = args.iter().map(encode_arg).collect();
    Ok(format!("{} {}", name, encoded.join(" ")))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
