//! Signal recording tools

use probe_client::{RecordingOptions, TargetSpec};
use rmcp::{model::CallToolResult, ErrorData as McpError};

use super::{invalid_params, json_success, probe_error};
use crate::params::StartRecordingParams;
use crate::session::SessionContext;

pub async fn start_recording(
    session: &SessionContext,
    params: StartRecordingParams,
) -> Result<CallToolResult, McpError> {
    if params.targets.iter().any(|t| t.object_id.is_empty()) {
        return Err(invalid_params("Every target needs a non-empty object_id"));
    }

    let targets: Vec<TargetSpec> = params.targets.into_iter().map(Into::into).collect();
    let options = RecordingOptions {
        include_lifecycle: params.include_lifecycle,
        capture_events: params.capture_events,
    };

    let summary = session
        .start_recording(&targets, options)
        .await
        .map_err(probe_error)?;
    json_success(&summary)
}

pub async fn stop_recording(session: &SessionContext) -> Result<CallToolResult, McpError> {
    json_success(&session.stop_recording().await)
}

pub async fn recording_status(session: &SessionContext) -> Result<CallToolResult, McpError> {
    json_success(&session.recorder().await.status())
}
