//! Waiting for a freshly started probe to accept connections
//!
//! Two phases under one deadline: an optional discovery wait (a hint that the
//! probe's socket should be open by now), then connect attempts with
//! exponential back-off until one succeeds or time runs out.

use std::time::Duration;

use tokio::time::Instant;

use crate::connection::ProbeConnection;
use crate::discovery::DiscoveryListener;
use crate::error::{ProbeError, ProbeResult};
use crate::process::ManagedProcess;

/// Bounds for [`wait_for_ready`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// Overall deadline for both phases
    pub timeout: Duration,
    /// Delay after the first failed connect attempt
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl ReadinessOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Connect to `ws_url` once the probe behind it is up
///
/// If `process` is given and it has exited unsuccessfully, the wait ends
/// early with [`ProbeError::ProcessExited`].
pub async fn wait_for_ready(
    ws_url: &str,
    options: ReadinessOptions,
    discovery: Option<&DiscoveryListener>,
    mut process: Option<&mut ManagedProcess>,
) -> ProbeResult<ProbeConnection> {
    let started = Instant::now();
    let deadline = started + options.timeout;

    if let Some(discovery) = discovery.filter(|d| d.is_running()) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match discovery.wait_for_probe(remaining).await {
            Some(probe) => tracing::debug!(url = %probe.ws_url(), "Discovery saw a probe"),
            None => tracing::debug!("No discovery announcement before deadline"),
        }
    }

    let mut backoff = options.initial_backoff;
    let mut attempts = 0u32;
    loop {
        if let Some(process) = process.as_deref_mut() {
            process.ensure_not_failed().await?;
        }

        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let conn = ProbeConnection::new(ws_url);
        let attempt = tokio::time::timeout(
            remaining.max(Duration::from_millis(100)),
            conn.connect(),
        )
        .await;

        match attempt {
            Ok(Ok(())) => {
                tracing::info!(url = ws_url, attempts, "Probe is ready");
                return Ok(conn);
            }
            Ok(Err(e)) => tracing::debug!(url = ws_url, attempts, error = %e, "Probe not ready yet"),
            Err(_) => tracing::debug!(url = ws_url, attempts, "Connect attempt timed out"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ProbeError::Timeout {
                url: ws_url.to_string(),
                elapsed: started.elapsed(),
            });
        }
        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = next_backoff(backoff, options.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn fast(timeout: Duration) -> ReadinessOptions {
        ReadinessOptions {
            timeout,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let max = Duration::from_secs(4);
        let mut delay = ReadinessOptions::default().initial_backoff;
        let mut seen = vec![delay];
        for _ in 0..5 {
            delay = next_backoff(delay, max);
            seen.push(delay);
        }
        let secs: Vec<f64> = seen.iter().map(Duration::as_secs_f64).collect();
        assert_eq!(secs, vec![0.5, 1.0, 2.0, 4.0, 4.0, 4.0]);
    }

    #[tokio::test]
    async fn test_times_out_when_nothing_listens() {
        let url = format!("ws://127.0.0.1:{}", free_port().await);
        let started = std::time::Instant::now();

        let err = wait_for_ready(&url, fast(Duration::from_millis(600)), None, None)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ProbeError::Timeout { .. }), "unexpected: {err:?}");
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert!(err.to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_connects_once_probe_starts_listening() {
        let port = free_port().await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let url = format!("ws://127.0.0.1:{port}");
        let conn = wait_for_ready(&url, fast(Duration::from_secs(5)), None, None)
            .await
            .unwrap();
        assert!(conn.is_connected());
        conn.disconnect().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_process_aborts_wait() {
        let mut process = ManagedProcess::spawn(
            "sh",
            &["-c".to_string(), "echo 'Qt platform plugin missing' >&2; exit 2".to_string()],
            std::iter::empty::<(&str, &str)>(),
        )
        .unwrap();
        while process.try_exit_status().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let url = format!("ws://127.0.0.1:{}", free_port().await);
        let started = std::time::Instant::now();
        let err = wait_for_ready(&url, fast(Duration::from_secs(10)), None, Some(&mut process))
            .await
            .err()
            .unwrap();

        match err {
            ProbeError::ProcessExited { code, stderr } => {
                assert_eq!(code, Some(2));
                assert!(stderr.contains("platform plugin"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_discovery_phase_is_bounded_by_deadline() {
        let discovery = DiscoveryListener::new(0);
        discovery.start().unwrap();

        let url = format!("ws://127.0.0.1:{}", free_port().await);
        let started = std::time::Instant::now();
        let err = wait_for_ready(&url, fast(Duration::from_millis(400)), Some(&discovery), None)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
        discovery.stop();
    }
}
