//! The orphan watchdog.
//!
//! A separate process started next to every redis-server. It is given the
//! supervisor pid and the server pid and nothing else. When the supervisor
//! disappears it terminates the server, so a crashed test run leaves no
//! redis-server behind.

use super::handle::{ProcessHandle, StopSignal, is_alive, send_signal};
use super::output::read_lines;
use crate::config::{ConfigKey, ResolveConfig};
use crate::error::{Error, Result};
use async_process::{Command, Stdio};
use std::path::PathBuf;
use std::time::Duration;

/// File name of the watchdog executable.
#[cfg(not(windows))]
pub const WATCHDOG_BINARY_NAME: &str = "redisms-watchdog";
#[cfg(windows)]
pub const WATCHDOG_BINARY_NAME: &str = "redisms-watchdog.exe";

/// Liveness polling interval.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// `/bin/sh` rendition of [`run`] used when no watchdog executable is found.
/// `$1` is the parent pid, `$2` the child pid.
pub const WATCHDOG_SCRIPT: &str = r#"trap 'exit 0' INT TERM
while kill -0 "$2" 2>/dev/null; do
  if ! kill -0 "$1" 2>/dev/null; then
    kill -TERM "$2" 2>/dev/null
    exit 0
  fi
  sleep 2 >/dev/null 2>&1 &
  wait $!
done
"#;

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The child exited on its own or was stopped by the supervisor.
    ChildExited,
    /// The parent disappeared and the child was sent SIGTERM.
    ParentGone,
}

/// Polls `parent` and `child` every `interval` until one of them is gone.
pub async fn run(parent: u32, child: u32, interval: Duration) -> WatchdogOutcome {
    loop {
        if !is_alive(child) {
            return WatchdogOutcome::ChildExited;
        }
        if !is_alive(parent) {
            if let Err(e) = send_signal(child, StopSignal::Terminate) {
                tracing::warn!(child, error = %e, "Failed to terminate orphaned process");
            }
            return WatchdogOutcome::ParentGone;
        }
        tokio::time::sleep(interval).await;
    }
}

/// How to launch a watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogCommand {
    /// A `redisms-watchdog` executable.
    Binary(PathBuf),
    /// [`WATCHDOG_SCRIPT`] run by `/bin/sh`.
    Script,
}

impl WatchdogCommand {
    /// Finds the watchdog: the `WATCHDOG_BINARY` setting, an executable next
    /// to the current one or one directory up, then the shell script on unix.
    pub fn locate(config: &ResolveConfig) -> Option<Self> {
        if let Some(path) = config.get(ConfigKey::WatchdogBinary) {
            return Some(WatchdogCommand::Binary(PathBuf::from(path)));
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from));
        if let Some(dir) = exe_dir {
            // Test binaries live in `target/<profile>/deps`.
            for candidate in [
                Some(dir.join(WATCHDOG_BINARY_NAME)),
                dir.parent().map(|up| up.join(WATCHDOG_BINARY_NAME)),
            ]
            .into_iter()
            .flatten()
            {
                if candidate.is_file() {
                    return Some(WatchdogCommand::Binary(candidate));
                }
            }
        }

        if cfg!(unix) {
            Some(WatchdogCommand::Script)
        } else {
            None
        }
    }

    /// Command watching `parent` on behalf of `child`.
    pub fn command(&self, parent: u32, child: u32) -> Command {
        let mut command = match self {
            WatchdogCommand::Binary(path) => Command::new(path),
            WatchdogCommand::Script => {
                let mut command = Command::new("/bin/sh");
                command.args(["-c", WATCHDOG_SCRIPT, WATCHDOG_BINARY_NAME]);
                command
            }
        };
        command.arg(parent.to_string()).arg(child.to_string());
        command
    }
}

/// Launches a watchdog for `child` with this process as the parent.
///
/// Returns `Ok(None)` where no watchdog is available.
pub(crate) fn spawn_watchdog(
    config: &ResolveConfig,
    child: u32,
    port: u16,
) -> Result<Option<ProcessHandle>> {
    let Some(watchdog) = WatchdogCommand::locate(config) else {
        tracing::warn!("No watchdog available, redis-server may outlive a crashed process");
        return Ok(None);
    };

    let parent = std::process::id();
    tracing::debug!(watchdog = ?watchdog, parent, child, "Starting watchdog");

    let mut process = watchdog
        .command(parent, child)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Process(format!("Failed to start watchdog: {}", e)))?;

    let stdout = process.stdout.take();
    let stderr = process.stderr.take();
    tokio::spawn(async move {
        let out = async {
            if let Some(stdout) = stdout {
                read_lines(stdout, |line| {
                    tracing::debug!("Redis[{}]: WATCHDOG STDOUT: {}", port, line)
                })
                .await;
            }
        };
        let err = async {
            if let Some(stderr) = stderr {
                read_lines(stderr, |line| {
                    tracing::debug!("Redis[{}]: WATCHDOG STDERR: {}", port, line)
                })
                .await;
            }
        };
        futures::join!(out, err);
    });

    Ok(Some(ProcessHandle::new(WATCHDOG_BINARY_NAME, process)))
}
