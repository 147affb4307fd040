//! Error types for probe communication
//!
//! Remote failures (the probe answered with a JSON-RPC error object) and
//! connection failures (not connected, stream lost) are separate variants so
//! callers can tell a rejected call from a dead transport.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while talking to a QtMCP probe
#[derive(Error, Debug)]
pub enum ProbeError {
    /// `call()` was invoked without a live connection
    #[error("Not connected to probe")]
    NotConnected,

    /// The probe answered with a JSON-RPC error object
    #[error("{message} (code {code})")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The stream ended or was closed while the request was in flight
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// The WebSocket handshake could not be completed
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// Writing a request frame failed
    #[error("Failed to send request: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),

    /// A request could not be serialized
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The probe did not become reachable before the deadline
    #[error("Timed out waiting for probe at {url} after {:.1}s", elapsed.as_secs_f64())]
    Timeout { url: String, elapsed: Duration },

    /// The launched process died before the probe came up
    #[error("{}", process_exited_message(*code, stderr))]
    ProcessExited { code: Option<i32>, stderr: String },
}

fn process_exited_message(code: Option<i32>, stderr: &str) -> String {
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    if stderr.is_empty() {
        format!("Launched process exited early (exit code {code})")
    } else {
        format!("Launched process exited early (exit code {code}): {stderr}")
    }
}

impl ProbeError {
    /// Build from a JSON-RPC `error` object, defaulting missing fields
    pub fn from_jsonrpc(error: &Value) -> Self {
        ProbeError::Remote {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown probe error")
                .to_string(),
            data: error.get("data").filter(|d| !d.is_null()).cloned(),
        }
    }

    /// JSON-RPC error code, if the probe supplied one
    pub fn code(&self) -> Option<i64> {
        match self {
            ProbeError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the probe itself rejected the call
    pub fn is_remote(&self) -> bool {
        matches!(self, ProbeError::Remote { .. })
    }

    /// True for "not connected" and "connection lost" failures
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ProbeError::NotConnected
                | ProbeError::ConnectionClosed { .. }
                | ProbeError::Connect { .. }
                | ProbeError::Send(_)
        )
    }
}

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors raised by the UDP discovery listener
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The discovery socket could not be created or bound
    #[error("Failed to bind discovery socket on UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_jsonrpc_full() {
        let err = ProbeError::from_jsonrpc(&json!({
            "code": -32601,
            "message": "Method not found",
            "data": {"method": "qt.nope"}
        }));
        assert_eq!(err.code(), Some(-32601));
        assert!(err.to_string().contains("Method not found"));
        match err {
            ProbeError::Remote { data, .. } => assert_eq!(data, Some(json!({"method": "qt.nope"}))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_jsonrpc_defaults() {
        let err = ProbeError::from_jsonrpc(&json!({}));
        match err {
            ProbeError::Remote { code, message, data } => {
                assert_eq!(code, -1);
                assert_eq!(message, "Unknown probe error");
                assert!(data.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remote_and_connection_are_distinct() {
        let remote = ProbeError::from_jsonrpc(&json!({"code": 1, "message": "no"}));
        assert!(remote.is_remote());
        assert!(!remote.is_connection());

        let closed = ProbeError::NotConnected;
        assert!(closed.is_connection());
        assert!(!closed.is_remote());
        assert_eq!(closed.code(), None);
    }

    #[test]
    fn test_process_exited_message() {
        let err = ProbeError::ProcessExited {
            code: Some(3),
            stderr: "cannot load probe".into(),
        };
        assert_eq!(
            err.to_string(),
            "Launched process exited early (exit code 3): cannot load probe"
        );
    }
}
