//! Application launch and probe injection tools

use rmcp::{model::CallToolResult, ErrorData as McpError};
use serde_json::json;

use super::{invalid_params, json_success};
use crate::config::expand_path;
use crate::launch::{
    inject_and_connect, launch_and_connect, path_or, resolve_launcher, timeout_or, InjectRequest,
    LaunchRequest,
};
use crate::params::{InjectProbeParams, LaunchAppParams};
use crate::session::SessionContext;

pub async fn launch_app(
    session: &SessionContext,
    params: LaunchAppParams,
) -> Result<CallToolResult, McpError> {
    let config = session.config();
    let connect_timeout = timeout_or(params.connect_timeout, config.connect_timeout)
        .map_err(|e| invalid_params(e.to_string()))?;

    let request = LaunchRequest {
        launcher: resolve_launcher(config.launcher_path.as_deref()),
        target: expand_path(&params.target),
        port: params.port.unwrap_or(config.port),
        qt_version: params.qt_version.or_else(|| config.qt_version.clone()),
        qt_path: path_or(params.qt_path.as_deref(), config.qt_path.as_deref()),
        connect_timeout,
    };

    match launch_and_connect(session, &request).await {
        Ok(report) => json_success(&report),
        Err(e) => {
            tracing::warn!(app = %params.target, error = %e, "Launch failed");
            json_success(&json!({"launched": false, "error": e.to_string()}))
        }
    }
}

pub async fn inject_probe(
    session: &SessionContext,
    params: InjectProbeParams,
) -> Result<CallToolResult, McpError> {
    let config = session.config();
    let connect_timeout = timeout_or(params.connect_timeout, config.connect_timeout)
        .map_err(|e| invalid_params(e.to_string()))?;

    let request = InjectRequest {
        probe_path: params.probe_path.as_deref().map(expand_path),
        qt_path: path_or(params.qt_path.as_deref(), config.qt_path.as_deref()),
        port: params.port.unwrap_or(config.port),
        connect_timeout,
        ..InjectRequest::from_config(config, params.pid)
    };

    match inject_and_connect(session, &request).await {
        Ok(report) => json_success(&report),
        Err(e) => {
            tracing::warn!(pid = params.pid, error = %e, "Probe injection failed");
            json_success(&json!({"injected": false, "error": e.to_string()}))
        }
    }
}
