//! Per-server session state
//!
//! One [`SessionContext`] is built at startup and shared by every tool call.
//! It owns the current probe connection (at most one), the discovery
//! listener, the event recorder and any processes started on the user's
//! behalf.

use std::sync::Arc;
use std::time::Duration;

use probe_client::{
    DiscoveryError, DiscoveryListener, EventRecorder, ManagedProcess, ProbeConnection, ProbeError,
    ProbeResult, RecordingOptions, StartSummary, StopSummary, TargetSpec, STALE_TIMEOUT,
};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{Mode, ServerConfig};
use crate::status::StatusSnapshot;

/// Grace period between SIGTERM and kill for managed processes
pub const PROCESS_GRACE: Duration = Duration::from_secs(5);

/// One row of `qtmcp_list_probes`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeListing {
    pub app_name: String,
    pub pid: u32,
    pub qt_version: String,
    pub ws_url: String,
    pub hostname: String,
    pub mode: String,
    pub uptime: f64,
    pub connected: bool,
}

pub struct SessionContext {
    config: ServerConfig,
    probe: Mutex<Option<Arc<ProbeConnection>>>,
    discovery: Option<Arc<DiscoveryListener>>,
    recorder: Mutex<EventRecorder>,
    processes: Mutex<Vec<ManagedProcess>>,
}

impl SessionContext {
    /// Build a session; discovery is created here but only bound by
    /// [`start_discovery`](Self::start_discovery)
    pub fn new(config: ServerConfig) -> Self {
        let discovery = config
            .discovery_enabled
            .then(|| Arc::new(DiscoveryListener::new(config.discovery_port)));

        Self {
            config,
            probe: Mutex::new(None),
            discovery,
            recorder: Mutex::new(EventRecorder::new()),
            processes: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Bind the discovery socket; `Ok(false)` when discovery is disabled
    pub fn start_discovery(&self) -> Result<bool, DiscoveryError> {
        let Some(discovery) = &self.discovery else {
            return Ok(false);
        };
        discovery.start()?;
        tracing::info!(port = discovery.port(), "Probe discovery started");
        Ok(true)
    }

    /// The discovery listener, running or not
    pub fn discovery(&self) -> Option<&DiscoveryListener> {
        self.discovery.as_deref()
    }

    fn active_discovery(&self) -> Option<&DiscoveryListener> {
        self.discovery().filter(|d| d.is_running())
    }

    /// Connect to `ws_url`, replacing the current connection
    ///
    /// The previous connection is torn down before the new one is opened, so
    /// on failure the session is left disconnected. The handshake runs
    /// without holding the session lock and is bounded by `connect_timeout`.
    pub async fn connect_to_probe(&self, ws_url: &str) -> ProbeResult<Arc<ProbeConnection>> {
        let old = self.probe.lock().await.take();
        if let Some(old) = old {
            self.retire(old).await;
        }

        let conn = ProbeConnection::new(ws_url);
        let limit = self.config.connect_timeout;
        match tokio::time::timeout(limit, conn.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProbeError::Timeout {
                    url: ws_url.to_string(),
                    elapsed: limit,
                })
            }
        }
        Ok(self.install_probe(conn).await)
    }

    /// Adopt an already connected probe (e.g. from a readiness wait)
    pub async fn install_probe(&self, conn: ProbeConnection) -> Arc<ProbeConnection> {
        let conn = Arc::new(conn);
        let mut current = self.probe.lock().await;
        if let Some(old) = current.replace(Arc::clone(&conn)) {
            self.retire(old).await;
        }
        conn
    }

    /// Drop the current connection; returns its URL if it was live
    pub async fn disconnect_probe(&self) -> Option<String> {
        let old = self.probe.lock().await.take()?;
        let was_connected = old.is_connected();
        let ws_url = old.ws_url().to_string();
        self.retire(old).await;
        was_connected.then_some(ws_url)
    }

    /// The live connection, or [`ProbeError::NotConnected`]
    pub async fn require_probe(&self) -> ProbeResult<Arc<ProbeConnection>> {
        self.probe
            .lock()
            .await
            .as_ref()
            .filter(|p| p.is_connected())
            .cloned()
            .ok_or(ProbeError::NotConnected)
    }

    /// URL of the live connection, if any
    pub async fn connected_url(&self) -> Option<String> {
        self.probe
            .lock()
            .await
            .as_ref()
            .filter(|p| p.is_connected())
            .map(|p| p.ws_url().to_string())
    }

    pub async fn status(&self) -> StatusSnapshot {
        let ws_url = self.connected_url().await;
        StatusSnapshot {
            connected: ws_url.is_some(),
            ws_url,
            mode: self.mode(),
            discovery_active: self.active_discovery().is_some(),
            discovered_probes: self.discovery().map_or(0, |d| d.probes().len()),
        }
    }

    /// Prune stale announcements, then list what is left
    ///
    /// `None` when discovery is disabled or failed to start.
    pub async fn list_probes(&self) -> Option<Vec<ProbeListing>> {
        let discovery = self.active_discovery()?;
        discovery.prune_stale(STALE_TIMEOUT);

        let current = self.connected_url().await;
        let mut probes: Vec<ProbeListing> = discovery
            .probes()
            .into_iter()
            .map(|probe| {
                let ws_url = probe.ws_url();
                ProbeListing {
                    connected: current.as_deref() == Some(ws_url.as_str()),
                    app_name: probe.app_name,
                    pid: probe.pid,
                    qt_version: probe.qt_version,
                    ws_url,
                    hostname: probe.hostname,
                    mode: probe.mode,
                    uptime: (probe.uptime * 10.0).round() / 10.0,
                }
            })
            .collect();
        probes.sort_by(|a, b| a.ws_url.cmp(&b.ws_url).then(a.pid.cmp(&b.pid)));
        Some(probes)
    }

    pub async fn recorder(&self) -> MutexGuard<'_, EventRecorder> {
        self.recorder.lock().await
    }

    /// Start (or restart) a recording on the live connection
    pub async fn start_recording(
        &self,
        targets: &[TargetSpec],
        options: RecordingOptions,
    ) -> ProbeResult<StartSummary> {
        let probe = self.require_probe().await?;
        let recorder = self.recorder.lock().await;
        Ok(recorder.start(&*probe, targets, options).await)
    }

    /// Stop the recording and return its events
    ///
    /// Works against a connection that has dropped in the meantime; the
    /// failed teardown calls show up as cleanup errors.
    pub async fn stop_recording(&self) -> StopSummary {
        let probe = self.probe.lock().await.clone();
        let recorder = self.recorder.lock().await;
        match probe {
            Some(probe) => recorder.stop(&*probe).await,
            None => StopSummary::not_recording(),
        }
    }

    /// Keep a spawned process so shutdown can terminate it
    pub async fn track_process(&self, process: ManagedProcess) {
        self.processes.lock().await.push(process);
    }

    pub async fn process_count(&self) -> usize {
        self.processes.lock().await.len()
    }

    /// Release everything the session holds; every step is best-effort
    pub async fn shutdown(&self) {
        let probe = self.probe.lock().await.take();
        if let Some(probe) = probe {
            self.retire(probe).await;
        }

        if let Some(discovery) = self.discovery() {
            discovery.stop();
        }

        let mut processes = std::mem::take(&mut *self.processes.lock().await);
        for process in &mut processes {
            tracing::debug!(program = process.label(), pid = ?process.pid(), "Terminating process");
            process.terminate(PROCESS_GRACE).await;
        }

        tracing::info!("Session shut down");
    }

    /// Stop any recording bound to `old`, then disconnect it
    async fn retire(&self, old: Arc<ProbeConnection>) {
        let recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            let summary = recorder.stop(&*old).await;
            tracing::warn!(
                discarded_events = summary.event_count,
                "Recording stopped because its probe connection was replaced"
            );
        }
        drop(recorder);
        old.disconnect().await;
    }
}
