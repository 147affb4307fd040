//! Server configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `qtmcp.toml` (`--config`, else walking up from cwd, else the user config dir)
//! 3. Environment variables and command-line flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file name searched for on startup
pub const CONFIG_FILE: &str = "qtmcp.toml";

pub const DEFAULT_PORT: u16 = 9222;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid connect timeout: {0}")]
    InvalidTimeout(f64),
}

/// API flavour the server advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Native,
    Cu,
    Chrome,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Native => "native",
            Mode::Cu => "cu",
            Mode::Chrome => "chrome",
        }
    }
}

/// `serve` flags; every value is optional so file settings can fill gaps
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// API mode to expose
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// WebSocket URL of the probe (auto-connect on startup)
    #[arg(long, env = "QTMCP_WS_URL")]
    pub ws_url: Option<String>,

    /// Qt application to launch with the probe on startup
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// WebSocket port for launched/injected probes (default: 9222)
    #[arg(long, env = "QTMCP_PORT")]
    pub port: Option<u16>,

    /// Path to the qtmcp launcher executable
    #[arg(long, env = "QTMCP_LAUNCHER")]
    pub launcher_path: Option<PathBuf>,

    /// UDP port for probe discovery (default: 9221)
    #[arg(long, env = "QTMCP_DISCOVERY_PORT")]
    pub discovery_port: Option<u16>,

    /// Disable UDP probe discovery
    #[arg(long)]
    pub no_discovery: bool,

    /// Qt version used to pick the probe library (e.g. 5.15, 6.8)
    #[arg(long, value_name = "VERSION")]
    pub qt_version: Option<String>,

    /// Qt lib/bin directory added to the launched app's library path
    #[arg(long, env = "QTMCP_QT_PATH")]
    pub qt_path: Option<PathBuf>,

    /// Seconds to wait for a launched probe (default: 30)
    #[arg(long, env = "QTMCP_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<f64>,

    /// Config file (default: qtmcp.toml found from the working directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Contents of `qtmcp.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mode: Option<Mode>,
    pub ws_url: Option<String>,
    pub target: Option<String>,
    pub port: Option<u16>,
    pub launcher_path: Option<String>,
    pub qt_version: Option<String>,
    pub qt_path: Option<String>,
    pub connect_timeout: Option<f64>,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverySection {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
}

impl FileConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub mode: Mode,
    pub ws_url: Option<String>,
    pub target: Option<PathBuf>,
    pub port: u16,
    pub launcher_path: Option<PathBuf>,
    pub discovery_enabled: bool,
    pub discovery_port: u16,
    pub qt_version: Option<String>,
    pub qt_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            ws_url: None,
            target: None,
            port: DEFAULT_PORT,
            launcher_path: None,
            discovery_enabled: true,
            discovery_port: probe_client::DEFAULT_DISCOVERY_PORT,
            qt_version: None,
            qt_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Load the config file (if any) and apply `args` on top
    pub fn load(args: &ServeArgs) -> Result<Self, ConfigError> {
        let path = match &args.config {
            Some(path) => Some(expand_path(&path.to_string_lossy())),
            None => find_config_file(CONFIG_FILE),
        };

        let file = match path {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                FileConfig::load_from_path(&path)?
            }
            None => FileConfig::default(),
        };

        Self::merge(file, args)
    }

    /// Combine file values and flags; flags win
    pub fn merge(file: FileConfig, args: &ServeArgs) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let connect_timeout = match args.connect_timeout.or(file.connect_timeout) {
            Some(secs) => {
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidTimeout(secs))?
            }
            None => defaults.connect_timeout,
        };

        let port = args.port.or(file.port).unwrap_or(defaults.port);
        let target = args
            .target
            .clone()
            .or_else(|| file.target.as_deref().map(expand_path));

        // A launched target is always reached on localhost at the launch port
        let ws_url = match &target {
            Some(_) => Some(format!("ws://localhost:{port}")),
            None => args.ws_url.clone().or(file.ws_url),
        };

        Ok(Self {
            mode: args.mode.or(file.mode).unwrap_or(defaults.mode),
            ws_url,
            target,
            port,
            launcher_path: args
                .launcher_path
                .clone()
                .or_else(|| file.launcher_path.as_deref().map(expand_path)),
            discovery_enabled: !args.no_discovery && file.discovery.enabled.unwrap_or(true),
            discovery_port: args
                .discovery_port
                .or(file.discovery.port)
                .unwrap_or(defaults.discovery_port),
            qt_version: args.qt_version.clone().or(file.qt_version),
            qt_path: args
                .qt_path
                .clone()
                .or_else(|| file.qt_path.as_deref().map(expand_path)),
            connect_timeout,
        })
    }
}

/// Expand `~` and `$VAR` in a path, leaving it unchanged on failure
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::full(raw).unwrap_or_else(|_| raw.into());
    PathBuf::from(expanded.as_ref())
}

/// Find a config file by walking up from cwd, then in the user config dir
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_file_from(&cwd, filename).or_else(|| {
        let global = dirs::config_dir()?.join("qtmcp").join(filename);
        global.exists().then_some(global)
    })
}

fn find_config_file_from(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.exists())
}
