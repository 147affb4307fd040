//! UDP discovery of QtMCP probes
//!
//! Probes broadcast `announce` datagrams while running and a `goodbye` when
//! they exit. The listener keeps one entry per (source address, pid, ws
//! port) and only forgets silent probes when [`DiscoveryListener::prune_stale`]
//! is called.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::DiscoveryError;

/// UDP port probes broadcast on
pub const DEFAULT_DISCOVERY_PORT: u16 = 9221;
/// Value of the `protocol` field every discovery datagram must carry
pub const DISCOVERY_PROTOCOL: &str = "qtmcp-discovery";
/// Probes not heard from for longer than this are considered gone
pub const STALE_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_WS_PORT: u16 = 9222;

/// Identity of one probe instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProbeKey {
    pub address: IpAddr,
    pub pid: u32,
    pub ws_port: u16,
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.address, self.pid, self.ws_port)
    }
}

/// A probe seen via UDP broadcast
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredProbe {
    pub app_name: String,
    pub pid: u32,
    pub qt_version: String,
    pub ws_port: u16,
    pub hostname: String,
    pub mode: String,
    pub address: IpAddr,
    pub uptime: f64,
    #[serde(skip)]
    pub last_seen: Instant,
}

impl DiscoveredProbe {
    /// WebSocket URL to connect to this probe
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.address, self.ws_port)
    }

    pub fn key(&self) -> ProbeKey {
        ProbeKey {
            address: self.address,
            pid: self.pid,
            ws_port: self.ws_port,
        }
    }

    /// Whether the probe has been silent for longer than `timeout`
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_mode() -> String {
    "all".to_string()
}

fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}

/// Wire shape shared by announce and goodbye datagrams
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Datagram {
    #[serde(default)]
    protocol: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default = "default_unknown")]
    app_name: String,
    #[serde(default)]
    pid: u32,
    #[serde(default = "default_unknown")]
    qt_version: String,
    #[serde(default = "default_ws_port")]
    ws_port: u16,
    #[serde(default = "default_unknown")]
    hostname: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    uptime: f64,
}

/// Callback invoked once for every newly discovered probe
pub type FoundCallback = Arc<dyn Fn(&DiscoveredProbe) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    probes: Mutex<HashMap<ProbeKey, DiscoveredProbe>>,
    callbacks: Mutex<Vec<FoundCallback>>,
    found: Notify,
}

impl Inner {
    fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        let Ok(msg) = serde_json::from_slice::<Datagram>(data) else {
            return;
        };
        if msg.protocol != DISCOVERY_PROTOCOL {
            return;
        }

        match msg.kind.as_str() {
            "announce" => self.on_announce(msg, source.ip()),
            "goodbye" => self.on_goodbye(&msg, source.ip()),
            other => tracing::debug!(kind = other, "Ignoring unknown discovery message"),
        }
    }

    fn on_announce(&self, msg: Datagram, address: IpAddr) {
        let probe = DiscoveredProbe {
            app_name: msg.app_name,
            pid: msg.pid,
            qt_version: msg.qt_version,
            ws_port: msg.ws_port,
            hostname: msg.hostname,
            mode: msg.mode,
            address,
            uptime: msg.uptime,
            last_seen: Instant::now(),
        };

        let is_new = lock(&self.probes)
            .insert(probe.key(), probe.clone())
            .is_none();
        if !is_new {
            return;
        }

        tracing::info!(
            app = %probe.app_name,
            pid = probe.pid,
            url = %probe.ws_url(),
            "Discovered new probe"
        );
        self.found.notify_waiters();

        let callbacks = lock(&self.callbacks).clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&probe))).is_err() {
                tracing::warn!(key = %probe.key(), "Discovery callback panicked");
            }
        }
    }

    fn on_goodbye(&self, msg: &Datagram, address: IpAddr) {
        let key = ProbeKey {
            address,
            pid: msg.pid,
            ws_port: msg.ws_port,
        };
        if let Some(removed) = lock(&self.probes).remove(&key) {
            tracing::info!(app = %removed.app_name, pid = removed.pid, "Probe departed");
        }
    }

    fn any_probe(&self) -> Option<DiscoveredProbe> {
        lock(&self.probes).values().next().cloned()
    }
}

/// Listens for probe UDP broadcast announcements
pub struct DiscoveryListener {
    port: AtomicU16,
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for DiscoveryListener {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_PORT)
    }
}

impl DiscoveryListener {
    pub fn new(port: u16) -> Self {
        Self {
            port: AtomicU16::new(port),
            inner: Arc::new(Inner {
                probes: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Vec::new()),
                found: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// UDP port the listener binds (the actual port once bound to 0)
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Bind the socket and start receiving datagrams
    ///
    /// Must be called inside a Tokio runtime. A no-op when already running.
    pub fn start(&self) -> Result<(), DiscoveryError> {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let port = self.port();
        let socket = bind_socket(port).map_err(|source| DiscoveryError::Bind { port, source })?;
        if let Ok(addr) = socket.local_addr() {
            self.port.store(addr.port(), Ordering::SeqCst);
        }

        *task = Some(tokio::spawn(recv_loop(socket, Arc::clone(&self.inner))));
        tracing::info!(port = self.port(), "Discovery listener started");
        Ok(())
    }

    /// Close the socket; safe to call when not running
    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            tracing::info!("Discovery listener stopped");
        }
    }

    /// Register a callback for newly discovered probes
    pub fn on_found(&self, callback: FoundCallback) {
        lock(&self.inner.callbacks).push(callback);
    }

    /// Feed one datagram from `source` through the registry
    pub fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        self.inner.handle_datagram(data, source);
    }

    /// Snapshot of the currently known probes
    pub fn probes(&self) -> Vec<DiscoveredProbe> {
        lock(&self.inner.probes).values().cloned().collect()
    }

    /// Return a known probe, or wait up to `timeout` for the next one
    pub async fn wait_for_probe(&self, timeout: Duration) -> Option<DiscoveredProbe> {
        let notified = self.inner.found.notified();
        tokio::pin!(notified);
        // Register interest before checking so an announce in between is not lost
        notified.as_mut().enable();

        if let Some(probe) = self.inner.any_probe() {
            return Some(probe);
        }

        match tokio::time::timeout(timeout, notified).await {
            Ok(()) => self.inner.any_probe(),
            Err(_) => None,
        }
    }

    /// Remove probes silent for longer than `timeout`, returning their keys
    pub fn prune_stale(&self, timeout: Duration) -> Vec<ProbeKey> {
        let mut probes = lock(&self.inner.probes);
        let stale: Vec<ProbeKey> = probes
            .values()
            .filter(|p| p.is_stale(timeout))
            .map(DiscoveredProbe::key)
            .collect();

        for key in &stale {
            if let Some(removed) = probes.remove(key) {
                tracing::info!(app = %removed.app_name, pid = removed.pid, "Pruned stale probe");
            }
        }
        stale
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// UDP socket with address reuse so several servers can share the port
fn bind_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from(([0, 0, 0, 0], port)).into())?;
    UdpSocket::from_std(socket.into())
}

async fn recv_loop(socket: UdpSocket, inner: Arc<Inner>) {
    let mut buf = vec![0u8; 65_536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, source)) => inner.handle_datagram(&buf[..len], source),
            Err(e) => tracing::warn!(error = %e, "Discovery UDP error"),
        }
    }
}
