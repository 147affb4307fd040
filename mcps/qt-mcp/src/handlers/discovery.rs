//! Probe discovery and connection management tools

use rmcp::{model::CallToolResult, ErrorData as McpError};
use serde_json::json;

use super::json_success;
use crate::params::ConnectProbeParams;
use crate::session::SessionContext;

pub async fn list_probes(session: &SessionContext) -> Result<CallToolResult, McpError> {
    match session.list_probes().await {
        Some(probes) => json_success(&json!({"count": probes.len(), "probes": probes})),
        None => json_success(&json!({"error": "Discovery is not enabled"})),
    }
}

pub async fn connect_probe(
    session: &SessionContext,
    params: ConnectProbeParams,
) -> Result<CallToolResult, McpError> {
    match session.connect_to_probe(&params.ws_url).await {
        Ok(conn) => json_success(&json!({"connected": true, "ws_url": conn.ws_url()})),
        Err(e) => {
            tracing::warn!(url = %params.ws_url, error = %e, "Probe connection failed");
            json_success(&json!({"connected": false, "error": e.to_string()}))
        }
    }
}

pub async fn disconnect_probe(session: &SessionContext) -> Result<CallToolResult, McpError> {
    match session.disconnect_probe().await {
        Some(ws_url) => json_success(&json!({"disconnected": true, "ws_url": ws_url})),
        None => json_success(&json!({"disconnected": false, "reason": "No probe connected"})),
    }
}

pub async fn probe_status(session: &SessionContext) -> Result<CallToolResult, McpError> {
    json_success(&session.status().await)
}
