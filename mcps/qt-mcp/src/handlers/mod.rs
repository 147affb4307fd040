//! Tool handler implementations
//!
//! Handlers take the session plus typed params and return MCP results.
//! Probe failures become MCP errors; lifecycle and discovery outcomes are
//! reported in the result payload so the agent can read the reason.

pub mod discovery;
pub mod lifecycle;
pub mod native;
pub mod recording;

use probe_client::ProbeError;
use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;
use serde_json::json;

/// Pretty-printed JSON result
pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data).map_err(|e| internal_error(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub fn internal_error(message: impl Into<String>) -> McpError {
    McpError::internal_error(message.into(), None)
}

pub fn invalid_params(message: impl Into<String>) -> McpError {
    McpError::invalid_params(message.into(), None)
}

/// Map a probe failure, keeping the probe's JSON-RPC code in `data`
pub fn probe_error(err: ProbeError) -> McpError {
    match err {
        ProbeError::NotConnected => McpError::invalid_request(
            "Not connected to a probe. Use qtmcp_connect_probe or qtmcp_launch_app first.",
            None,
        ),
        ProbeError::Remote {
            code,
            message,
            data,
        } => McpError::internal_error(message, Some(json!({"code": code, "data": data}))),
        other => internal_error(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorCode;

    #[test]
    fn test_probe_error_mapping() {
        let err = probe_error(ProbeError::NotConnected);
        assert_eq!(err.code, ErrorCode::INVALID_REQUEST);

        let err = probe_error(ProbeError::from_jsonrpc(
            &json!({"code": -32001, "message": "Object not found", "data": {"objectId": "x"}}),
        ));
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(err.message, "Object not found");
        assert_eq!(
            err.data,
            Some(json!({"code": -32001, "data": {"objectId": "x"}}))
        );
    }

    #[test]
    fn test_json_success_is_not_error() {
        let result = json_success(&json!({"pong": true})).unwrap();
        assert!(!result.is_error.unwrap_or(false));
        assert_eq!(result.content.len(), 1);
    }
}
