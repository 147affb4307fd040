//! QtMCP - MCP server for automating Qt applications
//!
//! Exposes a QtMCP probe (injected into a running Qt application) as MCP
//! tools: object inspection, UI interaction, signal recording, probe
//! discovery and application launch.

pub mod artifacts;
pub mod config;
pub mod handlers;
pub mod init;
pub mod launch;
pub mod params;
pub mod server;
pub mod session;
pub mod status;

pub use config::{Mode, ServeArgs, ServerConfig};
pub use server::QtMcpServer;
pub use session::SessionContext;
