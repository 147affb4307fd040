//! MCP Server implementation for QtMCP probes

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        AnnotateAble, CallToolResult, ListResourcesResult, PaginatedRequestParam, RawResource,
        ReadResourceRequestParam, ReadResourceResult, ResourceContents, ServerCapabilities,
        ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer,
};

use crate::config::Mode;
use crate::handlers::{self, internal_error, native};
use crate::params::*;
use crate::session::SessionContext;
use crate::status::{STATUS_NAME, STATUS_URI};

/// The QtMCP MCP Server
#[derive(Clone)]
pub struct QtMcpServer {
    session: Arc<SessionContext>,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Probe control tools (always available)
// ============================================================================

#[tool_router]
impl QtMcpServer {
    pub fn new(session: Arc<SessionContext>) -> Self {
        let router = Self::tool_router();
        let router = match session.mode() {
            Mode::Native => router + Self::native_tool_router(),
            // Only the probe control tools are served outside native mode
            Mode::Cu | Mode::Chrome => router,
        };

        Self {
            session,
            tool_router: router,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    #[tool(
        description = "List QtMCP probes discovered on the network via UDP broadcast, with app name, PID, Qt version, WebSocket URL and connection state"
    )]
    async fn qtmcp_list_probes(&self) -> Result<CallToolResult, McpError> {
        handlers::discovery::list_probes(&self.session).await
    }

    #[tool(
        description = "Connect to a probe by WebSocket URL, replacing any current connection"
    )]
    async fn qtmcp_connect_probe(
        &self,
        Parameters(params): Parameters<ConnectProbeParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::discovery::connect_probe(&self.session, params).await
    }

    #[tool(description = "Disconnect from the current probe")]
    async fn qtmcp_disconnect_probe(&self) -> Result<CallToolResult, McpError> {
        handlers::discovery::disconnect_probe(&self.session).await
    }

    #[tool(description = "Get the probe connection and discovery status")]
    async fn qtmcp_probe_status(&self) -> Result<CallToolResult, McpError> {
        handlers::discovery::probe_status(&self.session).await
    }

    // ========================================================================
    // Recording
    // ========================================================================

    #[tool(
        description = "Start recording signals and input events on the given objects. Interact with the application, then call qtmcp_stop_recording for the timestamped event log"
    )]
    async fn qtmcp_start_recording(
        &self,
        Parameters(params): Parameters<StartRecordingParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::recording::start_recording(&self.session, params).await
    }

    #[tool(description = "Stop recording and return the captured event log")]
    async fn qtmcp_stop_recording(&self) -> Result<CallToolResult, McpError> {
        handlers::recording::stop_recording(&self.session).await
    }

    #[tool(description = "Get whether recording is active, its event count and duration")]
    async fn qtmcp_recording_status(&self) -> Result<CallToolResult, McpError> {
        handlers::recording::recording_status(&self.session).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tool(
        description = "Launch a Qt application with the QtMCP probe via the launcher, then wait for the probe and connect"
    )]
    async fn qtmcp_launch_app(
        &self,
        Parameters(params): Parameters<LaunchAppParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::lifecycle::launch_app(&self.session, params).await
    }

    #[tool(
        description = "Inject the QtMCP probe into a running Qt application (Linux, via gdb), then connect to it"
    )]
    async fn qtmcp_inject_probe(
        &self,
        Parameters(params): Parameters<InjectProbeParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::lifecycle::inject_probe(&self.session, params).await
    }
}

// ============================================================================
// Native qt.* tools (native mode)
// ============================================================================

#[tool_router(router = native_tool_router)]
impl QtMcpServer {
    // ========================================================================
    // Utility
    // ========================================================================

    #[tool(description = "Ping the probe to check connectivity")]
    async fn qt_ping(&self) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::PING, &NoParams {}).await
    }

    #[tool(description = "Return Qt and probe version information")]
    async fn qt_version(&self) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::VERSION, &NoParams {}).await
    }

    #[tool(description = "List the API modes the probe supports")]
    async fn qt_modes(&self) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::MODES, &NoParams {}).await
    }

    // ========================================================================
    // Object tree
    // ========================================================================

    #[tool(description = "Find objects by objectName, optionally under a root object")]
    async fn qt_objects_find(
        &self,
        Parameters(params): Parameters<FindParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::OBJECTS_FIND, &params).await
    }

    #[tool(
        name = "qt_objects_findByClass",
        description = "Find objects by class name (e.g. QPushButton), optionally under a root object"
    )]
    async fn qt_objects_find_by_class(
        &self,
        Parameters(params): Parameters<FindByClassParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::OBJECTS_FIND_BY_CLASS, &params).await
    }

    #[tool(description = "Get the object tree, optionally from a root with limited depth")]
    async fn qt_objects_tree(
        &self,
        Parameters(params): Parameters<TreeParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::OBJECTS_TREE, &params).await
    }

    #[tool(description = "Get basic info (class, parent, children) for an object")]
    async fn qt_objects_info(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::OBJECTS_INFO, &params).await
    }

    #[tool(description = "Deep-inspect an object: properties, methods and signals")]
    async fn qt_objects_inspect(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::OBJECTS_INSPECT, &params).await
    }

    #[tool(description = "Query objects by class and/or property values")]
    async fn qt_objects_query(
        &self,
        Parameters(params): Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::OBJECTS_QUERY, &params).await
    }

    // ========================================================================
    // Properties and methods
    // ========================================================================

    #[tool(description = "List all properties of an object")]
    async fn qt_properties_list(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::PROPERTIES_LIST, &params).await
    }

    #[tool(description = "Get a single property value")]
    async fn qt_properties_get(
        &self,
        Parameters(params): Parameters<PropertyGetParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::PROPERTIES_GET, &params).await
    }

    #[tool(description = "Set a property value on an object")]
    async fn qt_properties_set(
        &self,
        Parameters(params): Parameters<PropertySetParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::PROPERTIES_SET, &params).await
    }

    #[tool(description = "List all invokable methods of an object")]
    async fn qt_methods_list(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::METHODS_LIST, &params).await
    }

    #[tool(description = "Invoke a method on an object with optional arguments")]
    async fn qt_methods_invoke(
        &self,
        Parameters(params): Parameters<InvokeParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::METHODS_INVOKE, &params).await
    }

    // ========================================================================
    // Signals
    // ========================================================================

    #[tool(description = "List all signals of an object")]
    async fn qt_signals_list(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::SIGNALS_LIST, &params).await
    }

    #[tool(description = "Subscribe to a signal on an object")]
    async fn qt_signals_subscribe(
        &self,
        Parameters(params): Parameters<SubscribeParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::SIGNALS_SUBSCRIBE, &params).await
    }

    #[tool(description = "Unsubscribe from a signal by subscription ID")]
    async fn qt_signals_unsubscribe(
        &self,
        Parameters(params): Parameters<UnsubscribeParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::SIGNALS_UNSUBSCRIBE, &params).await
    }

    #[tool(
        name = "qt_signals_setLifecycle",
        description = "Enable or disable object lifecycle notifications"
    )]
    async fn qt_signals_set_lifecycle(
        &self,
        Parameters(params): Parameters<LifecycleParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::SIGNALS_SET_LIFECYCLE, &params).await
    }

    // ========================================================================
    // UI interaction
    // ========================================================================

    #[tool(description = "Click on a widget, optionally specifying button and position")]
    async fn qt_ui_click(
        &self,
        Parameters(params): Parameters<ClickParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::UI_CLICK, &params).await
    }

    #[tool(
        name = "qt_ui_sendKeys",
        description = "Send key input to a widget (text or key sequence)"
    )]
    async fn qt_ui_send_keys(
        &self,
        Parameters(params): Parameters<SendKeysParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::UI_SEND_KEYS, &params).await
    }

    #[tool(description = "Capture a screenshot of a widget as base64 PNG")]
    async fn qt_ui_screenshot(
        &self,
        Parameters(params): Parameters<ScreenshotParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::UI_SCREENSHOT, &params).await
    }

    #[tool(description = "Get the geometry (position, size) of a widget")]
    async fn qt_ui_geometry(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::UI_GEOMETRY, &params).await
    }

    #[tool(
        name = "qt_ui_hitTest",
        description = "Find the widget at the given screen coordinates"
    )]
    async fn qt_ui_hit_test(
        &self,
        Parameters(params): Parameters<HitTestParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::UI_HIT_TEST, &params).await
    }

    // ========================================================================
    // Named objects
    // ========================================================================

    #[tool(description = "Register a friendly name for an object path")]
    async fn qt_names_register(
        &self,
        Parameters(params): Parameters<NameRegisterParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::NAMES_REGISTER, &params).await
    }

    #[tool(description = "Remove a registered name")]
    async fn qt_names_unregister(
        &self,
        Parameters(params): Parameters<NameParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::NAMES_UNREGISTER, &params).await
    }

    #[tool(description = "List all registered friendly names")]
    async fn qt_names_list(&self) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::NAMES_LIST, &NoParams {}).await
    }

    #[tool(description = "Check that every registered name still resolves to an object")]
    async fn qt_names_validate(&self) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::NAMES_VALIDATE, &NoParams {}).await
    }

    #[tool(description = "Load name registrations from a JSON file")]
    async fn qt_names_load(
        &self,
        Parameters(params): Parameters<NamesLoadParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::NAMES_LOAD, &params).await
    }

    // ========================================================================
    // QML and models
    // ========================================================================

    #[tool(description = "Inspect QML-specific properties and bindings of an object")]
    async fn qt_qml_inspect(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::QML_INSPECT, &params).await
    }

    #[tool(description = "List all item models in the application")]
    async fn qt_models_list(&self) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::MODELS_LIST, &NoParams {}).await
    }

    #[tool(description = "Get model metadata (row/column counts, role names)")]
    async fn qt_models_info(
        &self,
        Parameters(params): Parameters<ObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::MODELS_INFO, &params).await
    }

    #[tool(description = "Read model data with optional row/column/role filtering and pagination")]
    async fn qt_models_data(
        &self,
        Parameters(params): Parameters<ModelDataParams>,
    ) -> Result<CallToolResult, McpError> {
        native::forward(&self.session, native::MODELS_DATA, &params).await
    }
}

fn instructions(mode: Mode) -> String {
    let tools = match mode {
        Mode::Native => "qt_* tools inspect and drive objects; ",
        Mode::Cu | Mode::Chrome => "This mode serves probe control tools only; ",
    };
    format!(
        "QtMCP server ({} mode) for automating Qt applications through an injected probe. \
         Connect with qtmcp_list_probes + qtmcp_connect_probe, or start an app with \
         qtmcp_launch_app. {tools}qtmcp_start_recording captures signals and input events.",
        mode.as_str()
    )
}

#[tool_handler]
impl rmcp::ServerHandler for QtMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(instructions(self.session.mode())),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let mut status = RawResource::new(STATUS_URI, STATUS_NAME);
        status.description = Some("Current probe connection status".to_string());
        status.mime_type = Some("application/json".to_string());
        Ok(ListResourcesResult::with_all_items(vec![status.no_annotation()]))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        if request.uri != STATUS_URI {
            return Err(McpError::resource_not_found(
                format!("Unknown resource: {}", request.uri),
                None,
            ));
        }

        let text = self
            .session
            .status()
            .await
            .to_resource_text()
            .map_err(|e| internal_error(e.to_string()))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, STATUS_URI)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn server(mode: Mode) -> QtMcpServer {
        QtMcpServer::new(Arc::new(SessionContext::new(ServerConfig {
            mode,
            discovery_enabled: false,
            ..ServerConfig::default()
        })))
    }

    fn tool_names(server: &QtMcpServer) -> Vec<String> {
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_native_mode_serves_all_tools() {
        let names = tool_names(&server(Mode::Native));
        assert_eq!(names.len(), 41);
        assert!(names.contains(&"qt_ping".to_string()));
        assert!(names.contains(&"qt_objects_findByClass".to_string()));
        assert!(names.contains(&"qtmcp_start_recording".to_string()));
    }

    #[test]
    fn test_other_modes_serve_control_tools_only() {
        for mode in [Mode::Cu, Mode::Chrome] {
            let names = tool_names(&server(mode));
            assert_eq!(names.len(), 9);
            assert!(names.iter().all(|name| name.starts_with("qtmcp_")));
            assert!(!names.contains(&"qt_ping".to_string()));
        }
        assert!(instructions(Mode::Cu).contains("probe control tools only"));
    }
}
