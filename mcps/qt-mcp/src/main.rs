//! QtMCP - MCP server for automating Qt applications
//!
//! `qtmcp serve` runs the MCP server over stdio; `qtmcp locate-tools`
//! reports which probe and launcher files this platform needs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rmcp::{transport::io::stdio, ServiceExt};

use qt_mcp::artifacts::{
    ensure_available, find_probe_library, launcher_filename, probe_filename, probe_search_dirs,
    verify_artifact, ArtifactError, Platform, CHECKSUMS_FILE,
};
use qt_mcp::config::{ServeArgs, ServerConfig};
use qt_mcp::init::init_tracing;
use qt_mcp::launch::{launch_and_connect, LaunchRequest};
use qt_mcp::{QtMcpServer, SessionContext};

#[derive(Parser)]
#[command(name = "qtmcp")]
#[command(about = "MCP server for Qt application automation via the QtMCP probe")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server over stdio
    Serve(ServeArgs),
    /// Show the probe/launcher file names for a Qt version and any local probe library
    LocateTools {
        /// Qt version (e.g. 5.15, 5.15-patched, 6.5, 6.8, 6.9)
        #[arg(long, value_name = "VERSION")]
        qt_version: String,

        /// Launcher location used to search for the probe library
        #[arg(long, env = "QTMCP_LAUNCHER")]
        launcher_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::LocateTools {
            qt_version,
            launcher_path,
        } => {
            if let Err(e) = locate_tools(&qt_version, launcher_path) {
                eprintln!("Error: {e}");
                std::process::exit(e.exit_code());
            }
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig::load(&args)?;
    tracing::info!(mode = config.mode.as_str(), "Starting QtMCP server");

    let session = Arc::new(SessionContext::new(config));

    match session.start_discovery() {
        Ok(true) => {}
        Ok(false) => tracing::info!("Probe discovery disabled"),
        Err(e) => tracing::warn!(error = %e, "Probe discovery unavailable"),
    }

    auto_connect(&session).await;

    let server = QtMcpServer::new(Arc::clone(&session));
    let service = match server.serve(stdio()).await {
        Ok(service) => service,
        Err(e) => {
            session.shutdown().await;
            return Err(e.into());
        }
    };

    tracing::info!("QtMCP server running");

    let result = service.waiting().await;
    session.shutdown().await;
    result?;

    tracing::info!("QtMCP server stopped");

    Ok(())
}

/// Launch `--target` or connect to `--ws-url`; failures leave the server up
async fn auto_connect(session: &SessionContext) {
    let config = session.config();

    if let Some(target) = &config.target {
        let request = LaunchRequest::from_config(config, target.clone());
        match launch_and_connect(session, &request).await {
            Ok(report) if report.connected => {}
            Ok(report) => tracing::warn!(
                url = %report.ws_url,
                error = report.error.as_deref().unwrap_or_default(),
                "Launched target but could not connect to its probe"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to launch target"),
        }
    } else if let Some(ws_url) = &config.ws_url {
        if let Err(e) = session.connect_to_probe(ws_url).await {
            tracing::warn!(
                url = %ws_url,
                error = %e,
                "Auto-connect failed; use qtmcp_connect_probe once the probe is up"
            );
        }
    }
}

fn locate_tools(qt_version: &str, launcher_path: Option<PathBuf>) -> Result<(), ArtifactError> {
    let version = ensure_available(qt_version)?;
    let platform = Platform::detect()?;

    println!("Qt version:   {version}");
    println!("Platform:     {}", platform.name());
    println!("Probe:        {}", probe_filename(&version, platform));
    println!("Launcher:     {}", launcher_filename(platform));

    let dirs = probe_search_dirs(launcher_path.as_deref(), platform);
    let Some(path) = find_probe_library(&dirs, Some(&version), platform) else {
        println!("Installed:    (not found)");
        return Ok(());
    };
    println!("Installed:    {}", path.display());

    if verify_artifact(&path)? {
        println!("Checksum:     verified ({CHECKSUMS_FILE})");
    } else {
        println!("Checksum:     unverified (no {CHECKSUMS_FILE} beside the library)");
    }
    Ok(())
}
