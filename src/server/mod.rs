/// Process supervision for Redis Memory Server.
///
/// This module spawns redis-server, turns its output into state transitions,
/// stops it with signal escalation and keeps a watchdog process next to it.
/// All public entry points are instrumented with `tracing` spans.
///
/// # Components
///
/// * `classify` - output line classification
/// * `lifecycle` - the instance state machine
/// * `handle` - process identity, exit tracking and signals
/// * `shutdown` - SIGINT / SIGKILL escalation
/// * `process` - the supervised instance
/// * `watchdog` - the orphan watchdog
///
/// # Examples
///
/// Starting and stopping an instance:
///
/// ```no_run
/// use redis_memory_server::binary::BinaryResolver;
/// use redis_memory_server::server::{InstanceOptions, RedisInstance, RedisInstanceOptions};
///
/// # async fn run() -> redis_memory_server::Result<()> {
/// let resolver = BinaryResolver::global();
/// let instance = RedisInstance::run(
///     RedisInstanceOptions {
///         instance: InstanceOptions {
///             port: Some(6380),
///             ..Default::default()
///         },
///         ..Default::default()
///     },
///     &resolver,
/// )
/// .await?;
///
/// println!("redis-server pid {:?}", instance.pid());
/// instance.kill().await?;
/// # Ok(())
/// # }
/// ```
mod classify;
mod handle;
mod lifecycle;
mod output;
mod process;
mod shutdown;
pub mod watchdog;

pub use classify::{OutputEvent, classify_line};
pub use handle::{ExitInfo, ProcessHandle, StopSignal, is_alive, send_signal};
pub use lifecycle::{FailureReason, InstanceEvent, InstanceLifecycle, InstanceState};
pub use process::{
    DEFAULT_IP, InstanceOptions, RedisInstance, RedisInstanceOptions, SpawnOptions,
    prepare_command_args,
};
pub use shutdown::{KILL_TIMEOUT, terminate};
