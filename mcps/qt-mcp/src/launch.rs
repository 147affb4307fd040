//! Starting a Qt application with the probe, or loading the probe into one
//!
//! Launching goes through the probe's launcher executable. Injection into a
//! running process uses gdb to call `setenv` and `dlopen` inside the target
//! (Linux only).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use probe_client::{wait_for_ready, ManagedProcess, ReadinessOptions};
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

use crate::artifacts::{
    find_in_path, find_probe_library, launcher_filename, probe_search_dirs, Platform,
};
use crate::config::{expand_path, ServerConfig};
use crate::session::SessionContext;

/// How long gdb may take to attach, load the probe and detach
pub const INJECT_TIMEOUT: Duration = Duration::from_secs(30);

/// `dlopen` flag passed through gdb
const RTLD_NOW: i32 = 2;

const PTRACE_HINT: &str = "On Linux, ensure ptrace is allowed: \
     echo 0 | sudo tee /proc/sys/kernel/yama/ptrace_scope";

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Launcher not found: {0:?}. Install the QtMCP tools for your Qt version (see `qtmcp locate-tools`)")]
    LauncherNotFound(PathBuf),

    #[error("Could not start {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Runtime injection into running processes is not supported on this platform. \
         Use qtmcp_launch_app to start the application with the probe from the beginning."
    )]
    InjectionUnsupported,

    #[error(
        "gdb is required for runtime probe injection on Linux but was not found in PATH. \
         Install it with: apt install gdb (Debian/Ubuntu) or yum install gdb (RHEL/Fedora)."
    )]
    GdbNotFound,

    #[error("Could not find the QtMCP probe library. Provide probe_path explicitly, or install the probe next to the launcher")]
    ProbeLibraryNotFound,

    #[error("Probe library not found at: {0}")]
    ProbeLibraryMissing(PathBuf),

    #[error("gdb timed out after {} seconds", .0.as_secs())]
    InjectionTimeout(Duration),

    #[error("gdb could not attach to PID {pid} (permission denied). {PTRACE_HINT}")]
    PtraceDenied { pid: u32 },

    #[error("gdb exited with code {code:?}: {stderr}")]
    InjectionFailed { code: Option<i32>, stderr: String },

    #[error("Invalid connect timeout: {0}")]
    InvalidTimeout(f64),
}

/// Everything needed to start a target through the launcher
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub launcher: PathBuf,
    pub target: PathBuf,
    pub port: u16,
    pub qt_version: Option<String>,
    pub qt_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl LaunchRequest {
    /// Request for `target` using the server's defaults
    pub fn from_config(config: &ServerConfig, target: PathBuf) -> Self {
        Self {
            launcher: resolve_launcher(config.launcher_path.as_deref()),
            target,
            port: config.port,
            qt_version: config.qt_version.clone(),
            qt_path: config.qt_path.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    pub fn ws_url(&self) -> String {
        local_ws_url(self.port)
    }
}

/// Everything needed to load the probe into a running process
#[derive(Debug, Clone, PartialEq)]
pub struct InjectRequest {
    pub pid: u32,
    pub probe_path: Option<PathBuf>,
    pub qt_path: Option<PathBuf>,
    pub qt_version: Option<String>,
    pub launcher_path: Option<PathBuf>,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl InjectRequest {
    pub fn from_config(config: &ServerConfig, pid: u32) -> Self {
        Self {
            pid,
            probe_path: None,
            qt_path: config.qt_path.clone(),
            qt_version: config.qt_version.clone(),
            launcher_path: config.launcher_path.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout,
        }
    }

    pub fn ws_url(&self) -> String {
        local_ws_url(self.port)
    }
}

fn local_ws_url(port: u16) -> String {
    format!("ws://localhost:{port}")
}

/// Outcome of a launch that got as far as starting the launcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchReport {
    pub launched: bool,
    pub connected: bool,
    pub target: String,
    pub ws_url: String,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of an injection that got as far as loading the probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InjectReport {
    pub injected: bool,
    pub connected: bool,
    pub pid: u32,
    pub ws_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Seconds from a tool argument, falling back to `default`
pub fn timeout_or(secs: Option<f64>, default: Duration) -> Result<Duration, LaunchError> {
    match secs {
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| LaunchError::InvalidTimeout(secs)),
        None => Ok(default),
    }
}

/// Configured launcher, else the launcher found on `PATH`, else its bare name
pub fn resolve_launcher(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    let name = Platform::detect().map_or("qtmcp-launcher", launcher_filename);
    find_in_path(name).unwrap_or_else(|| PathBuf::from(name))
}

/// Start `request.target` via the launcher and connect to its probe
///
/// Spawn failures are errors; a probe that never comes up is reported in
/// the returned [`LaunchReport`].
pub async fn launch_and_connect(
    session: &SessionContext,
    request: &LaunchRequest,
) -> Result<LaunchReport, LaunchError> {
    let target = request.target.to_string_lossy().into_owned();
    let args = launch_args(&target, request.port, request.qt_version.as_deref());
    let env = launch_env(request.qt_path.as_deref());

    tracing::info!(
        app = %target,
        launcher = %request.launcher.display(),
        port = request.port,
        "Launching application"
    );

    let mut process =
        ManagedProcess::spawn(&request.launcher, &args, env).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LaunchError::LauncherNotFound(request.launcher.clone())
            } else {
                LaunchError::Spawn {
                    program: request.launcher.clone(),
                    source,
                }
            }
        })?;
    let pid = process.pid();

    let ws_url = request.ws_url();
    let ready = wait_for_ready(
        &ws_url,
        ReadinessOptions::with_timeout(request.connect_timeout),
        session.discovery(),
        Some(&mut process),
    )
    .await;
    session.track_process(process).await;

    let error = match ready {
        Ok(conn) => {
            session.install_probe(conn).await;
            None
        }
        Err(e) => {
            tracing::warn!(url = %ws_url, error = %e, "Launched probe did not become ready");
            Some(e.to_string())
        }
    };

    Ok(LaunchReport {
        launched: true,
        connected: error.is_none(),
        target,
        ws_url,
        pid,
        error,
    })
}

/// Locate the probe library for an injection request
fn resolve_probe_library(request: &InjectRequest) -> Result<PathBuf, LaunchError> {
    let probe = match &request.probe_path {
        Some(path) => path.clone(),
        None => {
            let platform = Platform::detect().map_err(|_| LaunchError::InjectionUnsupported)?;
            let dirs = probe_search_dirs(request.launcher_path.as_deref(), platform);
            find_probe_library(&dirs, request.qt_version.as_deref(), platform)
                .ok_or(LaunchError::ProbeLibraryNotFound)?
        }
    };

    if !probe.is_file() {
        return Err(LaunchError::ProbeLibraryMissing(probe));
    }
    Ok(std::fs::canonicalize(&probe).unwrap_or(probe))
}

/// Load the probe into a running process with gdb and connect to it
pub async fn inject_and_connect(
    session: &SessionContext,
    request: &InjectRequest,
) -> Result<InjectReport, LaunchError> {
    if !cfg!(target_os = "linux") {
        return Err(LaunchError::InjectionUnsupported);
    }

    let gdb = find_in_path("gdb").ok_or(LaunchError::GdbNotFound)?;
    let probe = resolve_probe_library(request)?;
    let env = launch_env(request.qt_path.as_deref());

    inject_with_gdb(&gdb, request.pid, &probe, request.port, &env).await?;

    let ws_url = request.ws_url();
    let ready = wait_for_ready(
        &ws_url,
        ReadinessOptions::with_timeout(request.connect_timeout),
        session.discovery(),
        None,
    )
    .await;

    let report = match ready {
        Ok(conn) => {
            session.install_probe(conn).await;
            InjectReport {
                injected: true,
                connected: true,
                pid: request.pid,
                ws_url,
                probe_path: Some(probe.display().to_string()),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(url = %ws_url, error = %e, "Injected probe did not become ready");
            InjectReport {
                injected: true,
                connected: false,
                pid: request.pid,
                ws_url,
                probe_path: None,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(report)
}

/// Tool-supplied path, expanded, or the configured one
pub fn path_or(arg: Option<&str>, configured: Option<&Path>) -> Option<PathBuf> {
    arg.map(expand_path).or_else(|| configured.map(Path::to_path_buf))
}

/// Launcher arguments: `TARGET --port N --detach [--qt-version V]`
pub fn launch_args(target: &str, port: u16, qt_version: Option<&str>) -> Vec<String> {
    let mut args = vec![
        target.to_string(),
        "--port".to_string(),
        port.to_string(),
        "--detach".to_string(),
    ];
    if let Some(version) = qt_version {
        args.push("--qt-version".to_string());
        args.push(version.to_string());
    }
    args
}

/// Variable the dynamic loader searches for Qt libraries
pub fn library_path_var() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Environment additions putting `qt_path` first on the library path
pub fn launch_env(qt_path: Option<&Path>) -> Vec<(String, OsString)> {
    let Some(qt_path) = qt_path else {
        return Vec::new();
    };

    let var = library_path_var();
    let existing = std::env::var_os(var).unwrap_or_default();
    vec![(var.to_string(), prepend_path(qt_path, &existing))]
}

fn prepend_path(dir: &Path, existing: &OsString) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    paths.extend(std::env::split_paths(existing).filter(|p| !p.as_os_str().is_empty()));
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

/// gdb command line that sets `QTMCP_PORT` and loads `probe` into `pid`
pub fn gdb_inject_args(pid: u32, probe: &Path, port: u16) -> Vec<String> {
    let commands = [
        format!("call (int)setenv(\"QTMCP_PORT\", \"{port}\", 1)"),
        format!("call (void*)dlopen(\"{}\", {RTLD_NOW})", probe.display()),
        "detach".to_string(),
        "quit".to_string(),
    ];

    let mut args = vec!["-batch".to_string(), "-p".to_string(), pid.to_string()];
    for command in commands {
        args.push("-ex".to_string());
        args.push(command);
    }
    args
}

/// Map a failed gdb run to an error, spotting ptrace denials
pub fn classify_gdb_failure(pid: u32, code: Option<i32>, stderr: &str) -> LaunchError {
    let stderr = stderr.trim();
    let lower = stderr.to_lowercase();
    if lower.contains("ptrace") || lower.contains("not permitted") {
        return LaunchError::PtraceDenied { pid };
    }
    LaunchError::InjectionFailed {
        code,
        stderr: stderr.chars().take(probe_client::process::STDERR_TAIL_CHARS).collect(),
    }
}

/// Attach gdb to `pid` and load the probe library
pub async fn inject_with_gdb(
    gdb: &Path,
    pid: u32,
    probe: &Path,
    port: u16,
    env: &[(String, OsString)],
) -> Result<(), LaunchError> {
    tracing::info!(pid, probe = %probe.display(), "Injecting probe via gdb");

    let output = Command::new(gdb)
        .args(gdb_inject_args(pid, probe, port))
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(INJECT_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(LaunchError::Spawn {
                program: gdb.to_path_buf(),
                source,
            })
        }
        Err(_) => return Err(LaunchError::InjectionTimeout(INJECT_TIMEOUT)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_gdb_failure(pid, output.status.code(), &stderr));
    }

    tracing::info!(pid, "Probe injected, waiting for WebSocket");
    Ok(())
}
