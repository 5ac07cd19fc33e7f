#![allow(dead_code)]

use async_trait::async_trait;
use redis_memory_server::binary::BinaryProvider;
use redis_memory_server::config::{ConfigKey, ResolveConfig};
use redis_memory_server::error::{Error, Result};
use redis_memory_server::{BinaryCache, BinaryResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a fake redis-server behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeRedis {
    /// Prints the readiness banner and exits on SIGINT.
    Ready,
    /// Prints the readiness banner and ignores SIGINT.
    IgnoresInterrupt,
    /// Prints a line that is not UTF-8, then behaves like `Ready`.
    NonUtf8Output,
    /// Reports a port conflict and exits.
    PortConflict,
    /// Reports a permission problem and exits.
    PermissionDenied,
    /// Exits without printing anything.
    ExitsImmediately,
}

const VERSION_LINE: &str = "Redis server v=7.2.4 sha=00000000:0 malloc=libc bits=64 build=0";

/// Writes an executable `redis-server` stand-in into `dir`.
///
/// The arguments it was started with are written to `$FAKE_REDIS_ARGS` when set.
pub fn write_fake_redis(dir: &Path, behavior: FakeRedis) -> PathBuf {
    let body = match behavior {
        FakeRedis::Ready => {
            "trap 'echo \"Redis is now ready to exit, bye bye...\"; exit 0' INT TERM\n\
             echo \"* Ready to accept connections tcp\"\n\
             while true; do sleep 1 >/dev/null 2>&1 & wait $!; done\n"
        }
        FakeRedis::NonUtf8Output => {
            "trap 'exit 0' INT TERM\n\
             printf 'Config dir \\377\\376\\n'\n\
             echo \"* Ready to accept connections tcp\"\n\
             while true; do sleep 1 >/dev/null 2>&1 & wait $!; done\n"
        }
        FakeRedis::IgnoresInterrupt => {
            "trap '' INT\n\
             echo \"* Ready to accept connections tcp\"\n\
             while true; do sleep 1 >/dev/null 2>&1 & wait $!; done\n"
        }
        FakeRedis::PortConflict => {
            "echo \"# Warning: Could not create server TCP listening socket 127.0.0.1:$PORT: bind: Address already in use\"\n\
             echo \"# Failed listening on port $PORT (tcp), aborting.\"\n\
             exit 1\n"
        }
        FakeRedis::PermissionDenied => {
            "echo \"# Can't open the log file: Permission denied\" >&2\n\
             exit 1\n"
        }
        FakeRedis::ExitsImmediately => "exit 0\n",
    };

    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then echo \"{}\"; exit 0; fi\n\
         if [ -n \"$FAKE_REDIS_ARGS\" ]; then printf '%s\\n' \"$@\" > \"$FAKE_REDIS_ARGS\"; fi\n\
         PORT=6379\n\
         while [ $# -gt 0 ]; do if [ \"$1\" = \"--port\" ]; then PORT=$2; fi; shift; done\n\
         {}",
        VERSION_LINE, body
    );

    let path = dir.join(format!("redis-server-{:?}", behavior).to_lowercase());
    std::fs::write(&path, script).unwrap();
    make_executable(&path);
    path
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) {}

/// Configuration using `binary` as the system binary and the built watchdog.
pub fn fake_config(binary: &Path) -> ResolveConfig {
    ResolveConfig::empty()
        .with_env(ConfigKey::SystemBinary, binary.to_string_lossy())
        .with_env(ConfigKey::WatchdogBinary, env!("CARGO_BIN_EXE_redisms-watchdog"))
}

/// Provider that must never be asked for a binary.
pub struct NoDownloads;

#[async_trait]
impl BinaryProvider for NoDownloads {
    async fn provide(&self, version: &str, _download_dir: &Path) -> Result<PathBuf> {
        Err(Error::Resolution(format!("unexpected download of {}", version)))
    }
}

/// Resolver that always resolves to `binary` without downloading.
pub fn fake_resolver(binary: &Path, cwd: &Path) -> BinaryResolver {
    BinaryResolver::new(
        Arc::new(fake_config(binary)),
        Arc::new(BinaryCache::new()),
        Arc::new(NoDownloads),
    )
    .with_working_dir(cwd)
}
