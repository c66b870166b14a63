use fxrunner::error::{Error, Result};
use fxrunner::transport::command::{SEMICOLON_SENTINEL, encode_arg, encode_command, sanitize_arg_string};
use serde_json::{Value, json};

// Reverses one token the way the server-side resource does.
fn decode_token(token: &str, was_string: bool) -> Value {
    let restored = token.replace(SEMICOLON_SENTINEL, ";");
    if was_string {
        return serde_json::from_str(&restored).expect("string token is JSON");
    }
    let inner = restored
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .expect("token is quoted");
    serde_json::from_str(&inner.replace("\\\"", "\"")).expect("inner token is JSON")
}

#[test]
fn test_encode_command_with_string_args() -> Result<()> {
    let line = encode_command("set", &[json!("txAdmin-locale"), json!("en")])?;
    assert_eq!(line, r#"set "txAdmin-locale" "en""#);
    Ok(())
}

#[test]
fn test_encode_semicolon() {
    assert_eq!(encode_arg(&json!(";")), "\"\u{037e}\"");
}

#[test]
fn test_encode_object() {
    assert_eq!(encode_arg(&json!({"a": true})), r#""{\"a\":true}""#);
}

#[test]
fn test_encode_command_rejects_bad_names() {
    for name in ["", "say hi", "quit;restart", "a\"b", "tab\tname"] {
        let result = encode_command(name, &[json!("x")]);
        assert!(matches!(result, Err(Error::Protocol(_))), "{:?} accepted", name);
    }
}

#[test]
fn test_encoded_tokens_have_no_separators() {
    let values = [
        json!("plain"),
        json!("semi;colon;;"),
        json!("with space and \"quotes\""),
        json!({"nested": {"list": [1, "two;", null]}}),
        json!([true, false, 1.5]),
    ];
    for value in &values {
        let token = encode_arg(value);
        assert!(!token.contains(';'), "semicolon leaked in {}", token);
        assert!(token.starts_with('"') && token.ends_with('"'));
    }
}

#[test]
fn test_encoded_args_decode_to_original() {
    let values = [
        json!("abc"),
        json!("te\"st"),
        json!("a;b; c"),
        json!(""),
        json!("back\\slash"),
        json!(42),
        json!(-0.25),
        json!(true),
        json!(null),
        json!({"a": 1}),
        json!({"msg": "say \"hi\"; quit", "path": "C:\\srv\\"}),
        json!([1, "two", {"three": [3]}]),
    ];
    for value in values {
        let token = encode_arg(&value);
        assert_eq!(decode_token(&token, value.is_string()), value, "token {}", token);
    }
}

#[test]
fn test_string_tokens_unescape_without_json() {
    // The server tokenizer only strips the quotes and unescapes \".
    let inputs = ["abc", "te\"st", "two words", "semi;colon", "\"\"", "ünïcødé ✓", "  padded  "];
    for input in inputs {
        let token = encode_arg(&json!(input));
        let inner = &token[1..token.len() - 1];
        let decoded = inner.replace("\\\"", "\"").replace(SEMICOLON_SENTINEL, ";");
        assert_eq!(decoded, input);
    }
}

#[test]
fn test_sanitizer_is_total() {
    let inputs = ["", ";", ";;;", "no semicolons", "\"quoted;\"", "ünïcødé;✓"];
    for input in inputs {
        let out = sanitize_arg_string(input);
        assert!(!out.contains(';'));
        assert_eq!(out.chars().count(), input.chars().count());
        assert_eq!(out.replace(SEMICOLON_SENTINEL, ";"), input);
    }
}
