//! Signal and input-event recording
//!
//! An [`EventRecorder`] turns a list of [`TargetSpec`]s into live signal
//! subscriptions on the probe and buffers the resulting notifications with
//! timestamps relative to the start of the session. Stopping always walks
//! the full cleanup plan; failed steps are reported, never raised.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::connection::{NotificationHandler, ProbeRpc};
use crate::error::ProbeResult;
use crate::protocol::{
    unwrap_envelope, EVENT_CAPTURED, OBJECT_CREATED, OBJECT_DESTROYED, SIGNAL_EMITTED,
};
use crate::signals::{signals_for_class, FALLBACK_SIGNALS};

const OBJECTS_INFO: &str = "qt.objects.info";
const SIGNALS_SUBSCRIBE: &str = "qt.signals.subscribe";
const SIGNALS_UNSUBSCRIBE: &str = "qt.signals.unsubscribe";
const SET_LIFECYCLE: &str = "qt.signals.setLifecycle";
const START_CAPTURE: &str = "qt.events.startCapture";
const STOP_CAPTURE: &str = "qt.events.stopCapture";

/// One object to watch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub object_id: String,
    /// Explicit signal names; `None` resolves defaults from the object's class
    #[serde(default)]
    pub signals: Option<Vec<String>>,
    /// Also watch the object's direct children
    #[serde(default)]
    pub recursive: bool,
}

impl TargetSpec {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            signals: None,
            recursive: false,
        }
    }

    pub fn with_signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signals = Some(signals.into_iter().map(Into::into).collect());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// Per-session switches for probe-side notification sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingOptions {
    /// Record `object_created` events (lifecycle notifications)
    pub include_lifecycle: bool,
    /// Install the probe's global mouse/key/focus event filter
    pub capture_events: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            include_lifecycle: true,
            capture_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EventKind {
    Signal { signal: String, args: Value },
    ObjectCreated { class_name: String },
    Input {
        event: String,
        class_name: String,
        detail: Map<String, Value>,
    },
}

/// One captured occurrence, timestamped from recording start
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    at: Duration,
    object_id: String,
    object_name: Option<String>,
    kind: EventKind,
}

impl RecordedEvent {
    /// Offset from the start of the recording
    pub fn elapsed(&self) -> Duration {
        self.at
    }

    /// Compact output form: `t`, `type`, `object`, optional `name`, then
    /// kind-specific fields (input-event detail is merged in flat)
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("t".into(), json!(round_secs(self.at)));

        match &self.kind {
            EventKind::Signal { signal, args } => {
                out.insert("type".into(), json!("signal"));
                out.insert("signal".into(), json!(signal));
                out.insert("args".into(), args.clone());
            }
            EventKind::ObjectCreated { class_name } => {
                out.insert("type".into(), json!("object_created"));
                out.insert("class".into(), json!(class_name));
            }
            EventKind::Input {
                event,
                class_name,
                detail,
            } => {
                out.insert("type".into(), json!("event"));
                out.insert("event".into(), json!(event));
                out.insert("class".into(), json!(class_name));
                out.extend(detail.clone());
            }
        }

        out.insert("object".into(), json!(self.object_id));
        if let Some(name) = &self.object_name {
            out.insert("name".into(), json!(name));
        }
        Value::Object(out)
    }
}

/// Seconds with millisecond precision, rounded half up
fn round_secs(d: Duration) -> f64 {
    let millis = (d.as_nanos() + 500_000) / 1_000_000;
    millis as f64 / 1000.0
}

/// Result of [`EventRecorder::start`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartSummary {
    pub recording: bool,
    pub subscriptions: usize,
    pub targets: usize,
    pub capture_events: bool,
}

/// Result of [`EventRecorder::stop`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopSummary {
    pub recording: bool,
    pub duration: f64,
    pub event_count: usize,
    pub events: Vec<Value>,
    /// Teardown steps that failed, in execution order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<String>,
}

impl StopSummary {
    /// Outcome of stopping when no session is active
    pub fn not_recording() -> Self {
        Self {
            recording: false,
            duration: 0.0,
            event_count: 0,
            events: Vec::new(),
            cleanup_errors: Vec::new(),
        }
    }
}

/// Result of [`EventRecorder::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderStatus {
    pub recording: bool,
    pub event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Teardown work, run in order; each failure is captured and the plan continues
#[derive(Debug, Clone, PartialEq)]
enum CleanupStep {
    Unsubscribe(Value),
    ClearHandler,
    DisableLifecycle,
    StopCapture,
}

impl CleanupStep {
    async fn run(&self, probe: &dyn ProbeRpc) -> ProbeResult<()> {
        match self {
            CleanupStep::Unsubscribe(id) => {
                probe
                    .call(SIGNALS_UNSUBSCRIBE, Some(json!({"subscriptionId": id})))
                    .await?;
            }
            CleanupStep::ClearHandler => probe.on_notification(None),
            CleanupStep::DisableLifecycle => {
                probe
                    .call(SET_LIFECYCLE, Some(json!({"enabled": false})))
                    .await?;
            }
            CleanupStep::StopCapture => {
                probe.call(STOP_CAPTURE, None).await?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            CleanupStep::Unsubscribe(id) => format!("unsubscribe {id}"),
            CleanupStep::ClearHandler => "clear notification handler".to_string(),
            CleanupStep::DisableLifecycle => "disable lifecycle notifications".to_string(),
            CleanupStep::StopCapture => "stop event capture".to_string(),
        }
    }
}

struct RecorderState {
    recording: bool,
    started: Instant,
    events: Vec<RecordedEvent>,
    subscriptions: Vec<Value>,
    options: RecordingOptions,
}

impl RecorderState {
    fn idle() -> Self {
        Self {
            recording: false,
            started: Instant::now(),
            events: Vec::new(),
            subscriptions: Vec::new(),
            options: RecordingOptions::default(),
        }
    }

    fn cleanup_plan(&self) -> Vec<CleanupStep> {
        let mut plan: Vec<CleanupStep> = self
            .subscriptions
            .iter()
            .cloned()
            .map(CleanupStep::Unsubscribe)
            .collect();
        plan.push(CleanupStep::ClearHandler);
        if self.options.include_lifecycle {
            plan.push(CleanupStep::DisableLifecycle);
        }
        if self.options.capture_events {
            plan.push(CleanupStep::StopCapture);
        }
        plan
    }

    /// Notification sink; runs on the connection's receive loop
    fn record(&mut self, method: &str, params: &Value) {
        if !self.recording {
            return;
        }
        let at = self.started.elapsed();
        let object_id = str_field(params, "objectId");
        let object_name = params
            .get("objectName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let kind = match method {
            SIGNAL_EMITTED => EventKind::Signal {
                signal: str_field(params, "signal"),
                args: params
                    .get("arguments")
                    .or_else(|| params.get("args"))
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            },
            OBJECT_CREATED if self.options.include_lifecycle => EventKind::ObjectCreated {
                class_name: str_field(params, "className"),
            },
            // Destroyed objects have already lost their id; nothing useful to keep
            OBJECT_DESTROYED => return,
            EVENT_CAPTURED => {
                let event = str_field(params, "type");
                EventKind::Input {
                    detail: input_detail(&event, params),
                    event,
                    class_name: str_field(params, "className"),
                }
            }
            _ => return,
        };

        self.events.push(RecordedEvent {
            at,
            object_id,
            object_name,
            kind,
        });
    }
}

fn str_field(params: &Value, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn field_or(params: &Value, key: &str, default: Value) -> Value {
    params.get(key).cloned().unwrap_or(default)
}

/// Event-type specific fields, selected by prefix
fn input_detail(event: &str, params: &Value) -> Map<String, Value> {
    let mut detail = Map::new();
    if event.starts_with("Mouse") {
        detail.insert("button".into(), field_or(params, "button", json!("")));
        let pos = params.get("pos").cloned().unwrap_or_else(|| json!({}));
        detail.insert(
            "pos".into(),
            json!([field_or(&pos, "x", json!(0)), field_or(&pos, "y", json!(0))]),
        );
    } else if event.starts_with("Key") {
        detail.insert("key".into(), field_or(params, "key", json!(0)));
        detail.insert("text".into(), field_or(params, "text", json!("")));
        detail.insert("modifiers".into(), field_or(params, "modifiers", json!("")));
    } else if event.starts_with("Focus") {
        detail.insert("reason".into(), field_or(params, "reason", json!("")));
    }
    detail
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffers probe notifications between `start()` and `stop()`
pub struct EventRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState::idle())),
        }
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.state).recording
    }

    pub fn event_count(&self) -> usize {
        lock(&self.state).events.len()
    }

    pub fn status(&self) -> RecorderStatus {
        let state = lock(&self.state);
        RecorderStatus {
            recording: state.recording,
            event_count: state.events.len(),
            duration: state
                .recording
                .then(|| round_secs(state.started.elapsed())),
        }
    }

    /// Handler feeding this recorder, for installation on a probe connection
    pub fn notification_handler(&self) -> NotificationHandler {
        let state = Arc::clone(&self.state);
        Arc::new(move |method: &str, params: &Value| lock(&state).record(method, params))
    }

    /// Begin a recording session, replacing any session in progress
    ///
    /// Individual enable/subscribe failures are logged and skipped; the
    /// summary reports how many subscriptions actually succeeded.
    pub async fn start(
        &self,
        probe: &dyn ProbeRpc,
        targets: &[TargetSpec],
        options: RecordingOptions,
    ) -> StartSummary {
        if self.is_recording() {
            let errors = self.teardown(probe).await;
            tracing::info!(
                cleanup_errors = errors.len(),
                "Discarded previous recording session"
            );
        }

        {
            let mut state = lock(&self.state);
            *state = RecorderState {
                recording: true,
                started: Instant::now(),
                events: Vec::new(),
                subscriptions: Vec::new(),
                options,
            };
        }
        probe.on_notification(Some(self.notification_handler()));

        if options.include_lifecycle {
            if let Err(e) = probe
                .call(SET_LIFECYCLE, Some(json!({"enabled": true})))
                .await
            {
                tracing::warn!(error = %e, "Failed to enable lifecycle notifications");
            }
        }
        if options.capture_events {
            if let Err(e) = probe.call(START_CAPTURE, None).await {
                tracing::warn!(error = %e, "Failed to start event capture");
            }
        }

        let mut subscriptions = 0;
        for target in targets {
            subscriptions += self.subscribe_target(probe, target).await;
        }

        tracing::info!(
            targets = targets.len(),
            subscriptions,
            capture_events = options.capture_events,
            "Recording started"
        );

        StartSummary {
            recording: true,
            subscriptions,
            targets: targets.len(),
            capture_events: options.capture_events,
        }
    }

    /// End the session and hand back everything recorded
    pub async fn stop(&self, probe: &dyn ProbeRpc) -> StopSummary {
        let duration = {
            let state = lock(&self.state);
            if !state.recording {
                return StopSummary::not_recording();
            }
            round_secs(state.started.elapsed())
        };

        let cleanup_errors = self.teardown(probe).await;

        let events: Vec<Value> = std::mem::take(&mut lock(&self.state).events)
            .iter()
            .map(RecordedEvent::to_json)
            .collect();

        tracing::info!(
            duration,
            event_count = events.len(),
            "Recording stopped"
        );

        StopSummary {
            recording: false,
            duration,
            event_count: events.len(),
            events,
            cleanup_errors,
        }
    }

    /// Run the cleanup plan and go idle, keeping buffered events
    async fn teardown(&self, probe: &dyn ProbeRpc) -> Vec<String> {
        let plan = {
            let mut state = lock(&self.state);
            let plan = state.cleanup_plan();
            state.subscriptions.clear();
            plan
        };

        let mut errors = Vec::new();
        for step in &plan {
            if let Err(e) = step.run(probe).await {
                tracing::warn!(step = %step.describe(), error = %e, "Cleanup step failed");
                errors.push(format!("{}: {e}", step.describe()));
            }
        }

        lock(&self.state).recording = false;
        errors
    }

    async fn subscribe_target(&self, probe: &dyn ProbeRpc, target: &TargetSpec) -> usize {
        let mut objects = vec![target.object_id.clone()];
        if target.recursive {
            objects.extend(child_ids(probe, &target.object_id).await);
        }

        let mut count = 0;
        for object_id in &objects {
            let signals = match &target.signals {
                Some(signals) => signals.clone(),
                None => resolve_smart_signals(probe, object_id).await,
            };

            for signal in &signals {
                let params = json!({"objectId": object_id, "signal": signal});
                match probe.call(SIGNALS_SUBSCRIBE, Some(params)).await {
                    Ok(result) => match subscription_id(&result) {
                        Some(id) => {
                            lock(&self.state).subscriptions.push(id);
                            count += 1;
                        }
                        None => tracing::debug!(
                            object_id = %object_id,
                            signal = %signal,
                            "Subscribe returned no subscription id"
                        ),
                    },
                    Err(e) => tracing::debug!(
                        object_id = %object_id,
                        signal = %signal,
                        error = %e,
                        "Failed to subscribe"
                    ),
                }
            }
        }
        count
    }
}

fn subscription_id(result: &Value) -> Option<Value> {
    unwrap_envelope(result)
        .get("subscriptionId")
        .filter(|id| !id.is_null() && id.as_str() != Some(""))
        .cloned()
}

/// Direct children of `object_id`; children may be ids or `{objectId}` objects
async fn child_ids(probe: &dyn ProbeRpc, object_id: &str) -> Vec<String> {
    let info = match probe
        .call(OBJECTS_INFO, Some(json!({"objectId": object_id})))
        .await
    {
        Ok(info) => info,
        Err(e) => {
            tracing::debug!(object_id, error = %e, "Failed to get children");
            return Vec::new();
        }
    };

    unwrap_envelope(&info)
        .get("children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(|child| match child {
                    Value::String(id) => Some(id.clone()),
                    other => other
                        .get("objectId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn resolve_smart_signals(probe: &dyn ProbeRpc, object_id: &str) -> Vec<String> {
    let signals = match probe
        .call(OBJECTS_INFO, Some(json!({"objectId": object_id})))
        .await
    {
        Ok(info) => signals_for_class(
            unwrap_envelope(&info)
                .get("className")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        ),
        Err(e) => {
            tracing::debug!(object_id, error = %e, "Class lookup failed, using fallback signals");
            FALLBACK_SIGNALS
        }
    };
    signals.iter().map(|s| s.to_string()).collect()
}
