use super::handle::{ProcessHandle, StopSignal};
use super::lifecycle::{FailureReason, InstanceLifecycle, InstanceState};
use super::output::spawn_output_monitor;
use super::shutdown::{KILL_TIMEOUT, terminate};
use super::watchdog::spawn_watchdog;
use crate::binary::{BinaryOptions, BinaryResolver};
use crate::config::validate_instance_options;
use crate::error::{Error, Result};
use async_process::{Command, Stdio};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Bind address used when none is given.
pub const DEFAULT_IP: &str = "127.0.0.1";

/// Network and argument options of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceOptions {
    /// Bind address, `127.0.0.1` when unset.
    pub ip: Option<String>,
    /// Port to listen on. `None` (or 0) leaves the choice to redis-server.
    pub port: Option<u16>,
    /// Extra redis-server arguments, appended after the defaults.
    pub args: Vec<String>,
}

/// Options of the spawned process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

/// Everything needed to run an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisInstanceOptions {
    pub instance: InstanceOptions,
    pub binary: BinaryOptions,
    pub spawn: SpawnOptions,
}

/// Builds the redis-server argument vector.
///
/// Persistence is always disabled and the defaults come before the caller's
/// arguments, so a caller may override them.
///
/// # Examples
///
/// ```
/// use redis_memory_server::server::{InstanceOptions, prepare_command_args};
///
/// let args = prepare_command_args(&InstanceOptions {
///     port: Some(27333),
///     ..Default::default()
/// });
/// assert_eq!(
///     args,
///     ["--save", "", "--appendonly", "no", "--bind", "127.0.0.1", "--port", "27333"]
/// );
/// ```
pub fn prepare_command_args(options: &InstanceOptions) -> Vec<String> {
    let mut args = vec![
        "--save".to_string(),
        String::new(),
        "--appendonly".to_string(),
        "no".to_string(),
        "--bind".to_string(),
        options.ip.clone().unwrap_or_else(|| DEFAULT_IP.to_string()),
    ];
    // Port 0 counts as unpinned.
    if let Some(port) = options.port.filter(|port| *port != 0) {
        args.push("--port".to_string());
        args.push(port.to_string());
    }
    args.extend(options.args.iter().cloned());
    args
}

/// A supervised redis-server process and its watchdog.
///
/// Created by [`RedisInstance::run`], which returns only once the server is
/// ready. A failed instance is never returned. [`RedisInstance::kill`] stops
/// both processes.
pub struct RedisInstance {
    opts: RedisInstanceOptions,
    lifecycle: InstanceLifecycle,
    server: ProcessHandle,
    watchdog: Option<ProcessHandle>,
    kill_timeout: Duration,
}

impl RedisInstance {
    /// Resolves the binary, starts the server and its watchdog, and waits until
    /// the server is ready.
    ///
    /// # Errors
    ///
    /// * `Error::PortConflict` if the port is taken
    /// * `Error::Process` with the classified reason for other startup failures
    /// * any resolution error from `resolver`
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(opts, resolver), fields(port = ?opts.instance.port))]
    pub async fn run(opts: RedisInstanceOptions, resolver: &BinaryResolver) -> Result<Self> {
        validate_instance_options(&opts.instance)?;
        let binary = resolver.resolve(&opts.binary).await?;
        let args = prepare_command_args(&opts.instance);
        let port = opts.instance.port.unwrap_or(0);

        tracing::debug!(binary = %binary.display(), args = ?args, "Starting redis-server");

        let mut command = Command::new(&binary);
        command
            .args(&args)
            .envs(&opts.spawn.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &opts.spawn.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Process(format!(
                "Failed to start {}: {}",
                binary.display(),
                e
            ))
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let server = ProcessHandle::new("redis-server", child);
        tracing::debug!(pid = server.pid(), "redis-server started");

        let lifecycle = InstanceLifecycle::new();
        spawn_output_monitor(
            port,
            stdout,
            stderr,
            lifecycle.clone(),
            server.subscribe_exit(),
        );

        let watchdog = match spawn_watchdog(resolver.config(), server.pid(), port) {
            Ok(watchdog) => watchdog,
            Err(e) => {
                let _ = server.signal(StopSignal::Kill);
                return Err(e);
            }
        };

        let instance = Self {
            opts,
            lifecycle,
            server,
            watchdog,
            kill_timeout: KILL_TIMEOUT,
        };

        match instance.wait_until_started().await {
            InstanceState::Ready => Ok(instance),
            state => {
                tracing::debug!(state = ?state, "redis-server failed to start");
                let error = match state {
                    InstanceState::Failed(FailureReason::PortConflict { port }) => {
                        Error::PortConflict { port }
                    }
                    InstanceState::Failed(reason) => Error::Process(reason.to_string()),
                    other => Error::Process(format!("unexpected state {:?}", other)),
                };
                if let Err(e) = instance.kill().await {
                    tracing::warn!(error = %e, "Failed to clean up after failed start");
                }
                Err(error)
            }
        }
    }

    async fn wait_until_started(&self) -> InstanceState {
        let mut state = self.lifecycle.subscribe();
        let waited = state
            .wait_for(|state| *state != InstanceState::Starting)
            .await
            .map(|state| state.clone());
        waited.unwrap_or_else(|_| self.lifecycle.state())
    }

    /// Stops the server and the watchdog, concurrently.
    ///
    /// Each gets SIGINT, then SIGKILL after the kill timeout. Both must exit
    /// before this returns.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` for the first process that survived SIGKILL.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(pid = self.server.pid()))]
    pub async fn kill(&self) -> Result<()> {
        tracing::debug!("Called RedisInstance.kill()");
        self.lifecycle.begin_shutdown();

        let server = terminate(&self.server, self.kill_timeout);
        let watchdog = async {
            match &self.watchdog {
                Some(watchdog) => terminate(watchdog, self.kill_timeout).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let (server, watchdog) = futures::join!(server, watchdog);

        server?;
        watchdog?;
        self.lifecycle.mark_stopped();
        tracing::debug!("Instance stopped");
        Ok(())
    }

    /// Overrides the per-step kill timeout.
    pub fn set_kill_timeout(&mut self, timeout: Duration) {
        self.kill_timeout = timeout;
    }

    /// Options the instance was started with.
    pub fn options(&self) -> &RedisInstanceOptions {
        &self.opts
    }

    /// Current state.
    pub fn state(&self) -> InstanceState {
        self.lifecycle.state()
    }

    /// The lifecycle, for observing transitions.
    pub fn lifecycle(&self) -> &InstanceLifecycle {
        &self.lifecycle
    }

    /// Server pid, `None` once it has exited.
    pub fn pid(&self) -> Option<u32> {
        (!self.server.has_exited()).then(|| self.server.pid())
    }

    /// Watchdog pid, `None` if there is none or it has exited.
    pub fn watchdog_pid(&self) -> Option<u32> {
        self.watchdog
            .as_ref()
            .filter(|watchdog| !watchdog.has_exited())
            .map(ProcessHandle::pid)
    }
}

impl Drop for RedisInstance {
    fn drop(&mut self) {
        for handle in std::iter::once(&self.server).chain(self.watchdog.as_ref()) {
            if !handle.has_exited() {
                tracing::debug!(name = handle.name(), pid = handle.pid(), "Killing process of dropped instance");
                let _ = handle.signal(StopSignal::Kill);
            }
        }
    }
}
