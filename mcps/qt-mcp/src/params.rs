//! Parameter types for QtMCP tools
//!
//! Native tool params serialize straight into the probe's `qt.*` request
//! params, so they use the probe's camelCase names and drop absent optionals.

use probe_client::TargetSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectParams {
    #[schemars(description = "Object ID, hierarchical path or registered name (e.g. \"MainWindow\")")]
    pub object_id: String,
}

// Object tree

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FindParams {
    #[schemars(description = "objectName to search for")]
    pub name: String,

    #[schemars(description = "Only search under this object")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindByClassParams {
    #[schemars(description = "Qt class name (e.g. \"QPushButton\")")]
    pub class_name: String,

    #[schemars(description = "Only search under this object")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TreeParams {
    #[schemars(description = "Start the tree at this object (default: all top-level objects)")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    #[schemars(description = "Maximum depth to descend")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    #[schemars(description = "Qt class name to match")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[schemars(description = "Property values to match (e.g. {\"text\": \"Hello\"})")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    #[schemars(description = "Only search under this object")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

// Properties and methods

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGetParams {
    pub object_id: String,

    #[schemars(description = "Property name (e.g. \"windowTitle\")")]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PropertySetParams {
    pub object_id: String,

    #[schemars(description = "Property name")]
    pub name: String,

    #[schemars(description = "New value: string, number or boolean")]
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvokeParams {
    pub object_id: String,

    #[schemars(description = "Invokable method or slot name (e.g. \"close\")")]
    pub method: String,

    #[schemars(description = "Positional arguments")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

// Signals

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    pub object_id: String,

    #[schemars(description = "Signal name (e.g. \"clicked\")")]
    pub signal: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeParams {
    #[schemars(description = "ID returned by qt_signals_subscribe")]
    pub subscription_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleParams {
    #[schemars(description = "Enable or disable object created/destroyed notifications")]
    pub enabled: bool,
}

// UI interaction

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClickParams {
    pub object_id: String,

    #[schemars(description = "Mouse button: \"left\" (default), \"right\" or \"middle\"")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,

    #[schemars(description = "Click position relative to the widget, {\"x\": .., \"y\": ..} (default: center)")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendKeysParams {
    pub object_id: String,

    #[schemars(description = "Text to type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[schemars(description = "Key sequence (e.g. \"Ctrl+A\")")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotParams {
    pub object_id: String,

    #[schemars(description = "Capture the whole top-level window")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_window: Option<bool>,

    #[schemars(description = "Sub-region {\"x\", \"y\", \"width\", \"height\"} in widget coordinates")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HitTestParams {
    #[schemars(description = "Screen X coordinate")]
    pub x: i32,

    #[schemars(description = "Screen Y coordinate")]
    pub y: i32,
}

// Named objects

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct NameRegisterParams {
    #[schemars(description = "Friendly name (e.g. \"submit\")")]
    pub name: String,

    #[schemars(description = "Object path the name refers to")]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct NameParams {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamesLoadParams {
    #[schemars(description = "JSON file with name registrations")]
    pub file_path: String,
}

// Models

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelDataParams {
    pub object_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,

    #[schemars(description = "Role name or number (default: display)")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Value>,

    #[schemars(description = "First row for pagination")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,

    #[schemars(description = "Maximum rows to return")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

// Discovery

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConnectProbeParams {
    #[schemars(description = "WebSocket URL (e.g. \"ws://192.168.1.100:9222\")")]
    pub ws_url: String,
}

// Recording

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecordingTarget {
    #[schemars(description = "Object to watch (e.g. \"MainWindow\")")]
    pub object_id: String,

    #[schemars(description = "Signals to subscribe to; omit for defaults based on the object's class")]
    #[serde(default)]
    pub signals: Option<Vec<String>>,

    #[schemars(description = "Also watch direct children (default: false)")]
    #[serde(default)]
    pub recursive: bool,
}

impl From<RecordingTarget> for TargetSpec {
    fn from(target: RecordingTarget) -> Self {
        TargetSpec {
            object_id: target.object_id,
            signals: target.signals,
            recursive: target.recursive,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StartRecordingParams {
    #[schemars(description = "Objects to watch")]
    pub targets: Vec<RecordingTarget>,

    #[schemars(description = "Record object creation events (default: true)")]
    #[serde(default = "default_true")]
    pub include_lifecycle: bool,

    #[schemars(description = "Capture mouse, keyboard and focus events application-wide (default: true)")]
    #[serde(default = "default_true")]
    pub capture_events: bool,
}

// Lifecycle

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LaunchAppParams {
    #[schemars(description = "Path to the Qt application executable")]
    pub target: String,

    #[schemars(description = "Qt lib/bin directory (overrides the server default)")]
    #[serde(default)]
    pub qt_path: Option<String>,

    #[schemars(description = "WebSocket port for the probe (default: server config or 9222)")]
    #[serde(default)]
    pub port: Option<u16>,

    #[schemars(description = "Qt version used to pick the probe (e.g. \"5.15\", \"6.8\")")]
    #[serde(default)]
    pub qt_version: Option<String>,

    #[schemars(description = "Seconds to wait for the probe (default: server config)")]
    #[serde(default)]
    pub connect_timeout: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InjectProbeParams {
    #[schemars(description = "Process ID of the running Qt application")]
    pub pid: u32,

    #[schemars(description = "Probe library path; located automatically if omitted")]
    #[serde(default)]
    pub probe_path: Option<String>,

    #[schemars(description = "Qt lib directory added to LD_LIBRARY_PATH for gdb")]
    #[serde(default)]
    pub qt_path: Option<String>,

    #[schemars(description = "WebSocket port the probe should listen on (default: 9222)")]
    #[serde(default)]
    pub port: Option<u16>,

    #[schemars(description = "Seconds to wait for the probe (default: server config)")]
    #[serde(default)]
    pub connect_timeout: Option<f64>,
}
