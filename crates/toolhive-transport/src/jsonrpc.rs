//! JSON-RPC 2.0 framing over container stdio
//!
//! Messages cross the container boundary as single JSON objects, one per
//! line, `\n` terminated. MCP servers share their stdout with whatever
//! their runtime prints, so the parser tolerates dirty output: when a line
//! carries stray binary, it extracts the `{ ... }` region, strips
//! non-printable characters, and tries again before giving up.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TransportError};

/// One JSON-RPC 2.0 message: request, notification, or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcMessage {
    /// A request or notification
    pub fn request(id: Option<Value>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Enforce the JSON-RPC 2.0 envelope.
    pub fn validate(&self) -> Result<()> {
        if self.jsonrpc != "2.0" {
            return Err(TransportError::InvalidMessage(format!(
                "jsonrpc version must be \"2.0\", got \"{}\"",
                self.jsonrpc
            )));
        }
        if self.method.is_none() && self.result.is_none() && self.error.is_none() {
            return Err(TransportError::InvalidMessage(
                "message has no method, result, or error".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a message from an HTTP request body.
    pub fn from_body(body: &str) -> Result<Self> {
        let msg: JsonRpcMessage = serde_json::from_str(body)
            .map_err(|e| TransportError::ParseFailure(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    /// Serialize to the single-line stdio framing (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TransportError::ParseFailure(e.to_string()))
    }
}

/// Parse one line of container stdout, recovering from dirty output.
pub fn parse_line(line: &str) -> Result<JsonRpcMessage> {
    let json = if has_binary_data(line) {
        let sanitized = sanitize_json_line(line);
        if sanitized.is_empty() {
            return Err(TransportError::ParseFailure(
                "no JSON object found in dirty output".to_string(),
            ));
        }
        tracing::debug!(sanitized = %sanitized, "recovered JSON from dirty output");
        sanitized
    } else {
        line.to_string()
    };

    let msg: JsonRpcMessage =
        serde_json::from_str(&json).map_err(|e| TransportError::ParseFailure(e.to_string()))?;
    msg.validate()?;
    Ok(msg)
}

fn has_binary_data(line: &str) -> bool {
    line.chars()
        .any(|c| (c as u32) < 0x20 && !matches!(c, '\t' | '\r' | '\n'))
}

/// Extract the substring from the first `{` to the last `}` and strip
/// everything that is not printable, keeping the content of string
/// literals intact apart from embedded control characters.
fn sanitize_json_line(input: &str) -> String {
    let start = match input.find('{') {
        Some(i) => i,
        None => return String::new(),
    };
    let end = match input.rfind('}') {
        Some(i) if i >= start => i,
        _ => return String::new(),
    };

    let mut out = String::with_capacity(end - start + 1);
    let mut in_string = false;
    for c in input[start..=end].chars() {
        if c == '"' {
            in_string = !in_string;
            out.push(c);
        } else if in_string {
            if !c.is_control() {
                out.push(c);
            }
        } else if !c.is_whitespace() && !c.is_control() {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_clean_request() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(msg.jsonrpc, "2.0");
        assert_eq!(msg.method.as_deref(), Some("ping"));
        assert_eq!(msg.id, Some(json!(1)));
    }

    #[test]
    fn test_parse_response() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#).unwrap();
        assert_eq!(msg.result, Some(json!("pong")));
        assert!(msg.method.is_none());
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert!(parse_line(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).is_err());
    }

    #[test]
    fn test_rejects_empty_envelope() {
        assert!(parse_line(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
    }

    #[test]
    fn test_recovers_json_between_garbage() {
        let line = "\x1b[2K\x07{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":\"ok\"}\x1b[0m";
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.id, Some(json!(7)));
        assert_eq!(msg.result, Some(json!("ok")));
    }

    #[test]
    fn test_recovers_with_control_chars_inside() {
        let line = "\x01{\"jsonrpc\": \"2.0\", \x02\"id\": 2, \"method\": \"ping\"}\x03";
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.method.as_deref(), Some("ping"));
    }

    #[test]
    fn test_unrecoverable_garbage_fails() {
        assert!(parse_line("\x01\x02 no json here").is_err());
        assert!(parse_line("\x01{truncated").is_err());
    }

    #[test]
    fn test_string_content_preserved() {
        let line = "\x07{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"hello world\"}";
        let msg = parse_line(line).unwrap();
        // Spaces inside string literals survive sanitization
        assert_eq!(msg.result, Some(json!("hello world")));
    }

    #[test]
    fn test_round_trip_line() {
        let msg = JsonRpcMessage::request(Some(json!(1)), "tools/list", None);
        let line = msg.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(parse_line(&line).unwrap(), msg);
    }

    #[test]
    fn test_from_body_validates() {
        assert!(JsonRpcMessage::from_body(r#"{"jsonrpc":"2.0","method":"x"}"#).is_ok());
        assert!(JsonRpcMessage::from_body("not json").is_err());
        assert!(JsonRpcMessage::from_body(r#"{"jsonrpc":"2.0"}"#).is_err());
    }
}
