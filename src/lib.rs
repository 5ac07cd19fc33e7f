/*!
 # Redis Memory Server

 A Rust library that provisions a disposable `redis-server` for test suites.

 ## Overview

 Redis Memory Server provides functionality to:
 - Find a usable `redis-server` executable: a system binary, a previous
   resolution, or a release archive downloaded and built on demand
 - Serialize downloads across processes with a lock file per version
 - Start the server with persistence disabled and wait until it is ready
 - Stop it with SIGINT, escalating to SIGKILL
 - Run a watchdog process that kills the server if the test process dies

 ## Basic Usage

 ```no_run
 use redis_memory_server::{RedisMemoryServer, RedisMemoryServerOptions, Result};

 #[tokio::main]
 async fn main() -> Result<()> {
     let server = RedisMemoryServer::create(RedisMemoryServerOptions {
         auto_start: true,
         ..Default::default()
     })
     .await?;

     let host = server.get_host().await?;
     let port = server.get_port().await?;
     println!("redis://{}:{}", host, port);

     server.stop().await?;
     Ok(())
 }
 ```

 ## Configuration

 Every option can be set with a `REDISMS_<NAME>` environment variable or in a
 `redis-memory-server.json` / `.yaml` file above the working directory, see
 [`config`]. `REDISMS_DEBUG=1` turns on debug logging once
 [`logging::init`] was called.

 ## License

 This project is licensed under the MIT license.
*/

pub mod binary;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod port;
pub mod server;

pub use binary::{BinaryCache, BinaryOptions, BinaryResolver};
pub use config::ResolveConfig;
pub use error::{Error, Result};
pub use port::{FreePortAllocator, PortAllocator};
pub use server::{InstanceOptions, RedisInstance, RedisInstanceOptions, SpawnOptions};

use server::DEFAULT_IP;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Options of a [`RedisMemoryServer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisMemoryServerOptions {
    /// Bind address, port and extra arguments.
    pub instance: InstanceOptions,
    /// Which binary to run.
    pub binary: BinaryOptions,
    /// Environment and working directory of the process.
    pub spawn: SpawnOptions,
    /// Start the instance in [`RedisMemoryServer::create`].
    pub auto_start: bool,
}

/// Address and process ids of a running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub ip: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub watchdog_pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServerPhase {
    Idle,
    Starting,
    Running(InstanceInfo),
    Failed(String),
}

/// A single redis-server instance for a test suite.
///
/// At most one instance runs per `RedisMemoryServer`: [`start`](Self::start)
/// fails while another start is in flight or an instance is running, and
/// [`ensure_instance`](Self::ensure_instance) waits for an in-flight start
/// instead of starting a second one. All public methods take `&self`, so the
/// server can be shared behind an `Arc`.
/// All public methods are instrumented with `tracing` spans.
pub struct RedisMemoryServer {
    opts: Mutex<RedisMemoryServerOptions>,
    phase: watch::Sender<ServerPhase>,
    instance: tokio::sync::Mutex<Option<RedisInstance>>,
    resolver: Arc<BinaryResolver>,
    ports: Arc<dyn PortAllocator>,
}

impl RedisMemoryServer {
    /// Creates a server using the process-wide configuration and binary cache.
    ///
    /// Does not start anything, even with `auto_start`; use
    /// [`create`](Self::create) for that.
    pub fn new(opts: RedisMemoryServerOptions) -> Self {
        Self::with_components(
            opts,
            Arc::new(BinaryResolver::global()),
            Arc::new(FreePortAllocator::new()),
        )
    }

    /// Creates a server with explicit collaborators.
    pub fn with_components(
        opts: RedisMemoryServerOptions,
        resolver: Arc<BinaryResolver>,
        ports: Arc<dyn PortAllocator>,
    ) -> Self {
        Self {
            opts: Mutex::new(opts),
            phase: watch::Sender::new(ServerPhase::Idle),
            instance: tokio::sync::Mutex::new(None),
            resolver,
            ports,
        }
    }

    /// Creates a server and, with `auto_start`, starts it.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(opts), fields(auto_start = opts.auto_start))]
    pub async fn create(opts: RedisMemoryServerOptions) -> Result<Self> {
        let auto_start = opts.auto_start;
        let server = Self::new(opts);
        if auto_start {
            tracing::debug!("Autostarting Redis instance");
            server.start().await?;
        }
        Ok(server)
    }

    /// Current options. The pinned port is cleared after a port conflict.
    pub fn options(&self) -> RedisMemoryServerOptions {
        self.opts
            .lock()
            .map(|opts| opts.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Starts the instance.
    ///
    /// A port conflict is retried once on another port. Other failures are
    /// returned as they are.
    ///
    /// # Errors
    ///
    /// `Error::AlreadyRunning` if an instance is starting, running or failed.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<bool> {
        tracing::debug!("Called RedisMemoryServer.start() method");
        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == ServerPhase::Idle {
                *phase = ServerPhase::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::AlreadyRunning);
        }

        let mut guard = StartGuard {
            phase: &self.phase,
            armed: true,
        };

        let result = match self.start_up_instance().await {
            Err(e) if e.is_port_conflict() => {
                tracing::debug!(error = %e, "Redis did not start. Trying to start on another port one more time");
                if let Ok(mut opts) = self.opts.lock() {
                    opts.instance.port = None;
                }
                self.start_up_instance().await
            }
            other => other,
        };

        match result {
            Ok((info, instance)) => {
                *self.instance.lock().await = Some(instance);
                self.phase.send_replace(ServerPhase::Running(info));
                guard.armed = false;
                Ok(true)
            }
            Err(e) => {
                guard.armed = false;
                if !tracing::enabled!(tracing::Level::DEBUG) {
                    tracing::warn!("Starting the instance failed, enable debug for more information");
                }
                self.phase.send_replace(ServerPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_up_instance(&self) -> Result<(InstanceInfo, RedisInstance)> {
        let opts = self.options();
        let ip = opts
            .instance
            .ip
            .clone()
            .unwrap_or_else(|| DEFAULT_IP.to_string());
        let port = self.ports.allocate(opts.instance.port, &ip).await?;
        if opts.instance.port.is_some_and(|pinned| pinned != port) {
            tracing::debug!(
                "starting with port {}, since {:?} was locked",
                port,
                opts.instance.port
            );
        }
        tracing::debug!(ip = %ip, port, "Starting Redis instance");

        let instance = RedisInstance::run(
            RedisInstanceOptions {
                instance: InstanceOptions {
                    ip: Some(ip.clone()),
                    port: Some(port),
                    args: opts.instance.args,
                },
                binary: opts.binary,
                spawn: opts.spawn,
            },
            &self.resolver,
        )
        .await?;

        let info = InstanceInfo {
            ip,
            port,
            pid: instance.pid(),
            watchdog_pid: instance.watchdog_pid(),
        };
        Ok((info, instance))
    }

    /// Stops the instance. Returns `true` also when nothing was running.
    ///
    /// A failed start is cleared, so the server can be started again.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` if the process could not be stopped.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Result<bool> {
        tracing::debug!("Called RedisMemoryServer.stop() method");
        let phase = self.phase.borrow().clone();
        match phase {
            ServerPhase::Idle => {
                tracing::debug!("Instance is already stopped, returning true");
                return Ok(true);
            }
            ServerPhase::Failed(_) => {
                self.phase.send_replace(ServerPhase::Idle);
                return Ok(true);
            }
            ServerPhase::Starting | ServerPhase::Running(_) => {}
        }

        let info = self.ensure_instance().await?;
        let instance = self.instance.lock().await.take();
        if let Some(instance) = instance {
            tracing::debug!(
                "Shutdown Redis server on port {} with pid {:?}",
                info.port,
                info.pid
            );
            if let Err(e) = instance.kill().await {
                self.phase.send_replace(ServerPhase::Failed(e.to_string()));
                return Err(e);
            }
        }

        self.phase.send_replace(ServerPhase::Idle);
        Ok(true)
    }

    /// The running instance, `None` before a start completed and after stop.
    pub fn get_instance_info(&self) -> Option<InstanceInfo> {
        match &*self.phase.borrow() {
            ServerPhase::Running(info) => Some(info.clone()),
            _ => None,
        }
    }

    /// Returns the running instance, starting it if idle and waiting for an
    /// in-flight start.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_instance(&self) -> Result<InstanceInfo> {
        tracing::debug!("Called RedisMemoryServer.ensureInstance() method");
        loop {
            let phase = self.phase.borrow().clone();
            match phase {
                ServerPhase::Running(info) => return Ok(info),
                ServerPhase::Failed(reason) => return Err(Error::Process(reason)),
                ServerPhase::Starting => {
                    let mut phase = self.phase.subscribe();
                    let _ = phase
                        .wait_for(|phase| *phase != ServerPhase::Starting)
                        .await;
                }
                ServerPhase::Idle => {
                    tracing::debug!(" - no running instance, call `start()` command");
                    match self.start().await {
                        Ok(_) | Err(Error::AlreadyRunning) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Host of the instance. Starts it if needed.
    pub async fn get_host(&self) -> Result<String> {
        self.get_ip().await
    }

    /// Bind address of the instance. Starts it if needed.
    pub async fn get_ip(&self) -> Result<String> {
        Ok(self.ensure_instance().await?.ip)
    }

    /// Port of the instance. Starts it if needed.
    pub async fn get_port(&self) -> Result<u16> {
        Ok(self.ensure_instance().await?.port)
    }
}

/// Marks a start that was dropped midway as failed, so waiters wake up.
struct StartGuard<'a> {
    phase: &'a watch::Sender<ServerPhase>,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.phase
                .send_replace(ServerPhase::Failed("start was cancelled".to_string()));
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ConfigKey;
    use crate::download::ArchiveDownloadProvider;
    use std::time::Duration;

    const READY_SCRIPT: &str = "#!/bin/sh\n\
        if [ \"$1\" = \"--version\" ]; then echo \"Redis server v=7.2.4\"; exit 0; fi\n\
        trap 'exit 0' INT TERM\n\
        echo \"* Ready to accept connections tcp\"\n\
        while true; do sleep 1 >/dev/null 2>&1 & wait $!; done\n";

    #[tokio::test]
    async fn test_start_cancelled_while_storing_instance() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let binary = dir.path().join("redis-server");
        std::fs::write(&binary, READY_SCRIPT)?;
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))?;

        let config = Arc::new(
            ResolveConfig::empty().with_env(ConfigKey::SystemBinary, binary.to_string_lossy()),
        );
        let resolver = BinaryResolver::new(
            Arc::clone(&config),
            Arc::new(BinaryCache::new()),
            Arc::new(ArchiveDownloadProvider::new(config)),
        )
        .with_working_dir(dir.path());
        let server = RedisMemoryServer::with_components(
            RedisMemoryServerOptions::default(),
            Arc::new(resolver),
            Arc::new(FreePortAllocator::new()),
        );

        // The instance slot is busy, so the start stalls after the server is ready.
        let slot = server.instance.lock().await;
        let started = tokio::time::timeout(Duration::from_secs(3), server.start()).await;
        assert!(started.is_err());
        drop(slot);

        let ensured = tokio::time::timeout(Duration::from_secs(1), server.ensure_instance()).await;
        assert!(matches!(ensured, Ok(Err(Error::Process(_)))));
        assert!(server.stop().await?);
        Ok(())
    }
}
