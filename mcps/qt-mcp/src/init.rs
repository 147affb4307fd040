//! Tracing setup for the server binary
//!
//! Logs go to stderr: stdout carries the MCP stdio transport.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose logs are enabled by default
const LOG_TARGETS: &[&str] = &["qt_mcp", "probe_client"];

fn default_directives(verbose: bool) -> Vec<String> {
    let level = if verbose { "debug" } else { "info" };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect()
}

/// Initialize tracing to stderr
///
/// `RUST_LOG` adds to the defaults; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    for directive in default_directives(verbose) {
        filter = filter.add_directive(directive.parse()?);
    }

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }

    Ok(())
}
