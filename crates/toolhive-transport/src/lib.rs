//! ToolHive Transport - Protocol Bridge
//!
//! Bidirectional translation between HTTP+SSE clients and an MCP server
//! speaking line-delimited JSON-RPC 2.0 over container stdio. The HTTP
//! surface lives in [`proxy`]; the stdio pumps in [`stdio`]; composable
//! middleware (including JWT auth) wraps the client-facing routes.

pub mod auth;
pub mod error;
pub mod jsonrpc;
pub mod proxy;
pub mod sse;
pub mod stdio;

pub use auth::{Claims, JwtValidator, JwtValidatorConfig};
pub use error::{Result, TransportError};
pub use jsonrpc::{parse_line, JsonRpcMessage};
pub use proxy::{apply_middlewares, HttpSseProxy, Middleware, MESSAGE_CHANNEL_CAPACITY};
pub use sse::{PendingSseMessage, SseClient, SseMessage};
pub use stdio::StdioBridge;
