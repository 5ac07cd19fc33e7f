use super::handle::{ExitInfo, ProcessHandle, StopSignal};
use crate::error::{Error, Result};
use std::time::Duration;

/// Time allowed for each escalation step.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Stops `handle`: SIGINT, then SIGKILL after `timeout`, then gives up after
/// another `timeout`.
///
/// # Errors
///
/// `Error::ShutdownTimeout` when the process survived both signals. It may
/// still be running.
///
/// This function is instrumented with `tracing`.
#[tracing::instrument(skip(handle), fields(name = %handle.name(), pid = handle.pid()))]
pub async fn terminate(handle: &ProcessHandle, timeout: Duration) -> Result<ExitInfo> {
    if let Some(info) = handle.exit_info() {
        tracing::debug!("Process already exited");
        return Ok(info);
    }

    tracing::debug!("Sending SIGINT");
    handle.signal(StopSignal::Interrupt)?;
    if let Some(info) = handle.wait_exit(timeout).await {
        return Ok(info);
    }

    tracing::warn!(
        "Process {} (pid {}) didn't exit after {}s, sending SIGKILL",
        handle.name(),
        handle.pid(),
        timeout.as_secs()
    );
    handle.signal(StopSignal::Kill)?;
    if let Some(info) = handle.wait_exit(timeout).await {
        return Ok(info);
    }

    tracing::error!("Process didn't exit after SIGKILL");
    Err(Error::ShutdownTimeout {
        name: handle.name().to_string(),
        pid: handle.pid(),
    })
}
