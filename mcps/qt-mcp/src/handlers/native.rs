//! Native-mode tools: each forwards to the probe method of the same name

use rmcp::{model::CallToolResult, ErrorData as McpError};
use serde::Serialize;

use super::{internal_error, json_success, probe_error};
use crate::session::SessionContext;

pub const PING: &str = "qt.ping";
pub const VERSION: &str = "qt.version";
pub const MODES: &str = "qt.modes";

pub const OBJECTS_FIND: &str = "qt.objects.find";
pub const OBJECTS_FIND_BY_CLASS: &str = "qt.objects.findByClass";
pub const OBJECTS_TREE: &str = "qt.objects.tree";
pub const OBJECTS_INFO: &str = "qt.objects.info";
pub const OBJECTS_INSPECT: &str = "qt.objects.inspect";
pub const OBJECTS_QUERY: &str = "qt.objects.query";

pub const PROPERTIES_LIST: &str = "qt.properties.list";
pub const PROPERTIES_GET: &str = "qt.properties.get";
pub const PROPERTIES_SET: &str = "qt.properties.set";

pub const METHODS_LIST: &str = "qt.methods.list";
pub const METHODS_INVOKE: &str = "qt.methods.invoke";

pub const SIGNALS_LIST: &str = "qt.signals.list";
pub const SIGNALS_SUBSCRIBE: &str = "qt.signals.subscribe";
pub const SIGNALS_UNSUBSCRIBE: &str = "qt.signals.unsubscribe";
pub const SIGNALS_SET_LIFECYCLE: &str = "qt.signals.setLifecycle";

pub const UI_CLICK: &str = "qt.ui.click";
pub const UI_SEND_KEYS: &str = "qt.ui.sendKeys";
pub const UI_SCREENSHOT: &str = "qt.ui.screenshot";
pub const UI_GEOMETRY: &str = "qt.ui.geometry";
pub const UI_HIT_TEST: &str = "qt.ui.hitTest";

pub const NAMES_REGISTER: &str = "qt.names.register";
pub const NAMES_UNREGISTER: &str = "qt.names.unregister";
pub const NAMES_LIST: &str = "qt.names.list";
pub const NAMES_VALIDATE: &str = "qt.names.validate";
pub const NAMES_LOAD: &str = "qt.names.load";

pub const QML_INSPECT: &str = "qt.qml.inspect";

pub const MODELS_LIST: &str = "qt.models.list";
pub const MODELS_INFO: &str = "qt.models.info";
pub const MODELS_DATA: &str = "qt.models.data";

/// Call `method` on the live probe with `params` and return its result
pub async fn forward<P: Serialize>(
    session: &SessionContext,
    method: &str,
    params: &P,
) -> Result<CallToolResult, McpError> {
    let probe = session.require_probe().await.map_err(probe_error)?;
    let params = serde_json::to_value(params)
        .map_err(|e| internal_error(format!("Failed to encode params for {method}: {e}")))?;

    let result = probe.call(method, Some(params)).await.map_err(probe_error)?;
    json_success(&result)
}
