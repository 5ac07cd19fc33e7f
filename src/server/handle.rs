use crate::error::{Error, Result};
use async_process::Child;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

/// Signals the supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful stop, redis-server saves nothing and exits.
    Interrupt,
    /// Polite termination, used by the watchdog.
    Terminate,
    /// Forceful termination.
    Kill,
}

/// OS identity of a spawned process and a watch on its exit.
///
/// The child is owned by a background task that waits for it; the handle only
/// keeps the pid, so signals are delivered by pid.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    exit: watch::Receiver<Option<ExitInfo>>,
    waiter: JoinHandle<()>,
}

impl ProcessHandle {
    /// Takes ownership of `child`. Take its standard streams beforehand.
    pub fn new(name: impl Into<String>, mut child: Child) -> Self {
        let name = name.into();
        let pid = child.id();
        let (tx, rx) = watch::channel(None);

        let task_name = name.clone();
        let waiter = tokio::spawn(async move {
            let info = match child.status().await {
                Ok(status) => ExitInfo {
                    code: status.code(),
                },
                Err(e) => {
                    tracing::warn!(name = %task_name, pid, error = %e, "Failed to wait for process");
                    ExitInfo { code: None }
                }
            };
            tracing::debug!(name = %task_name, pid, code = ?info.code, "Process exited");
            let _ = tx.send(Some(info));
        });

        Self {
            name,
            pid,
            exit: rx,
            waiter,
        }
    }

    /// Process name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit information, once the process has exited.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_info().is_some()
    }

    /// Receiver that turns `Some` when the process exits.
    pub fn subscribe_exit(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit.clone()
    }

    /// Waits for the exit, at most `timeout`.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ExitInfo> {
        let mut exit = self.exit.clone();
        let waited = tokio::time::timeout(timeout, async {
            exit.wait_for(Option::is_some).await.map(|info| *info)
        })
        .await;
        match waited {
            Ok(Ok(info)) => info,
            // The waiter task is gone, treat the last value as final.
            Ok(Err(_)) => *self.exit.borrow(),
            Err(_) => None,
        }
    }

    /// Sends `signal` unless the process already exited.
    pub fn signal(&self, signal: StopSignal) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        tracing::debug!(name = %self.name, pid = self.pid, signal = ?signal, "Sending signal");
        send_signal(self.pid, signal)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.has_exited() {
            self.waiter.abort();
        }
    }
}

/// Delivers `signal` to `pid`. A process that is already gone is not an error.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let sig = match signal {
        StopSignal::Interrupt => Signal::SIGINT,
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    match kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Process(format!(
            "Failed to send {} to pid {}: {}",
            sig, pid, e
        ))),
    }
}

/// Delivers `signal` to `pid` with `taskkill`.
#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if signal == StopSignal::Kill {
        args.push("/F");
    }
    std::process::Command::new("taskkill")
        .args(&args)
        .output()
        .map(|_| ())
        .map_err(|e| Error::Process(format!("Failed to run taskkill for pid {}: {}", pid, e)))
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with `pid` exists.
#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}
