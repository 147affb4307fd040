//! Client side of the QtMCP probe protocol
//!
//! Talks JSON-RPC 2.0 over WebSocket to a probe injected into a Qt
//! application, listens for probes announcing themselves over UDP, and
//! records the probe's signal/input notifications into a timestamped log.

pub mod connection;
pub mod discovery;
pub mod error;
pub mod process;
pub mod protocol;
pub mod readiness;
pub mod recorder;
pub mod signals;

pub use connection::{NotificationHandler, ProbeConnection, ProbeRpc};
pub use discovery::{
    DiscoveredProbe, DiscoveryListener, ProbeKey, DEFAULT_DISCOVERY_PORT, STALE_TIMEOUT,
};
pub use error::{DiscoveryError, ProbeError, ProbeResult};
pub use process::ManagedProcess;
pub use readiness::{wait_for_ready, ReadinessOptions};
pub use recorder::{
    EventRecorder, RecorderStatus, RecordingOptions, StartSummary, StopSummary, TargetSpec,
};
