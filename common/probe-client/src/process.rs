//! Child processes started on behalf of a probe (launcher, target app)

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::error::{ProbeError, ProbeResult};

/// Longest stderr excerpt carried in errors
pub const STDERR_TAIL_CHARS: usize = 500;

/// Bytes of stderr kept while the process runs; older output is dropped
pub const STDERR_BUFFER_BYTES: usize = 8 * 1024;

/// How long to keep reading stderr after the process is gone
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

type StderrBuffer = Arc<Mutex<Vec<u8>>>;

/// A spawned process with captured stderr
pub struct ManagedProcess {
    label: String,
    pid: Option<u32>,
    child: Child,
    stderr: StderrBuffer,
    drain: Option<JoinHandle<()>>,
}

/// Read stderr until EOF, keeping only the last [`STDERR_BUFFER_BYTES`]
async fn drain_stderr(mut stderr: ChildStderr, buffer: StderrBuffer) {
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut buf = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                buf.extend_from_slice(&chunk[..n]);
                let excess = buf.len().saturating_sub(STDERR_BUFFER_BYTES);
                buf.drain(..excess);
            }
        }
    }
}

impl ManagedProcess {
    /// Spawn `program` with `args`, adding `envs` to the inherited environment
    pub fn spawn<I, K, V>(program: impl AsRef<OsStr>, args: &[String], envs: I) -> std::io::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let label = program.as_ref().to_string_lossy().into_owned();
        let mut child = Command::new(program)
            .args(args)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id();
        let stderr = StderrBuffer::default();
        let drain = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain_stderr(pipe, Arc::clone(&stderr))));
        tracing::debug!(program = %label, ?pid, "Spawned process");

        Ok(Self {
            label,
            pid,
            child,
            stderr,
            drain,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program name the process was started from
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exit status if the process has already finished
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Last `max_chars` characters written to stderr, trimmed
    ///
    /// stderr is read continuously in the background. This waits briefly for
    /// the reader to reach EOF, then gives up in case a detached grandchild
    /// still holds the pipe open.
    pub async fn stderr_tail(&mut self, max_chars: usize) -> String {
        if let Some(mut drain) = self.drain.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut drain)
                .await
                .is_err()
            {
                self.drain = Some(drain);
            }
        }

        let buf = self
            .stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let text = String::from_utf8_lossy(&buf);
        let text = text.trim();
        let skip = text.chars().count().saturating_sub(max_chars);
        text.chars().skip(skip).collect()
    }

    /// Fail with [`ProbeError::ProcessExited`] if the process died unsuccessfully
    ///
    /// A clean exit is not an error: launchers started with `--detach` exit 0
    /// once the target is running.
    pub async fn ensure_not_failed(&mut self) -> ProbeResult<()> {
        match self.try_exit_status() {
            Ok(Some(status)) if !status.success() => {
                let stderr = self.stderr_tail(STDERR_TAIL_CHARS).await;
                Err(ProbeError::ProcessExited {
                    code: status.code(),
                    stderr,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(program = %self.label, error = %e, "Could not poll process status");
                Ok(())
            }
        }
    }

    /// Ask the process to exit, killing it after `grace`
    pub async fn terminate(&mut self, grace: Duration) {
        if matches!(self.try_exit_status(), Ok(Some(_))) {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) {
            // Ask politely first
            let _ = unsafe { libc::kill(pid, libc::SIGTERM) };
        }
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.label, %status, "Process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %self.label, error = %e, "Failed waiting for process");
            }
            Err(_) => {
                tracing::warn!(program = %self.label, "Process did not exit in time, killing");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(program = %self.label, error = %e, "Failed to kill process");
                }
            }
        }
    }
}
