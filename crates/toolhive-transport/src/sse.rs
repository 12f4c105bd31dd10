//! Server-Sent Events primitives
//!
//! The message types shared by the HTTP proxy: the wire framing for SSE
//! events, the per-client bounded queue, and the pending buffer for
//! messages that arrive while no client is connected.

use std::time::Instant;

use tokio::sync::mpsc;

/// Capacity of each connected client's outbound queue
pub const CLIENT_QUEUE_CAPACITY: usize = 100;
/// Maximum number of messages buffered while no client is connected.
/// When full, the oldest message is dropped.
pub const MAX_PENDING_MESSAGES: usize = 100;

/// One SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

impl SseMessage {
    pub fn new(event: &str, data: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            data: data.into(),
        }
    }

    /// Wire framing: `event:` line, one `data:` line per payload line,
    /// blank line terminator.
    pub fn to_sse_string(&self) -> String {
        let mut out = format!("event: {}\n", self.event);
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// A connected SSE client: its bounded queue and creation time
#[derive(Debug)]
pub struct SseClient {
    pub tx: mpsc::Sender<SseMessage>,
    pub created_at: Instant,
}

impl SseClient {
    pub fn new(tx: mpsc::Sender<SseMessage>) -> Self {
        Self {
            tx,
            created_at: Instant::now(),
        }
    }
}

/// A message held for the next client to connect
#[derive(Debug, Clone)]
pub struct PendingSseMessage {
    pub message: SseMessage,
    pub created_at: Instant,
}

impl PendingSseMessage {
    pub fn new(message: SseMessage) -> Self {
        Self {
            message,
            created_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_framing() {
        let msg = SseMessage::new("message", r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(
            msg.to_sse_string(),
            "event: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n"
        );
    }

    #[test]
    fn test_multiline_data_framing() {
        let msg = SseMessage::new("message", "line one\nline two");
        assert_eq!(
            msg.to_sse_string(),
            "event: message\ndata: line one\ndata: line two\n\n"
        );
    }
}
