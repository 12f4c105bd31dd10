//! Transport types for MCP workloads

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// How a workload speaks MCP.
///
/// `Stdio` servers read and write line-delimited JSON-RPC on their standard
/// streams; the bridge translates to HTTP+SSE on their behalf. `Sse` servers
/// expose an HTTP+SSE endpoint themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Sse,
}

impl TransportType {
    /// Whether this transport requires the container to have network access.
    pub fn needs_network(&self) -> bool {
        matches!(self, TransportType::Sse)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Sse => write!(f, "sse"),
        }
    }
}

impl FromStr for TransportType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportType::Stdio),
            "sse" => Ok(TransportType::Sse),
            other => Err(SpecError::UnsupportedTransport(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_type() {
        assert_eq!("stdio".parse::<TransportType>().unwrap(), TransportType::Stdio);
        assert_eq!("SSE".parse::<TransportType>().unwrap(), TransportType::Sse);
        assert!("websocket".parse::<TransportType>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for t in [TransportType::Stdio, TransportType::Sse] {
            assert_eq!(t.to_string().parse::<TransportType>().unwrap(), t);
        }
    }

    #[test]
    fn test_needs_network() {
        assert!(TransportType::Sse.needs_network());
        assert!(!TransportType::Stdio.needs_network());
    }
}
