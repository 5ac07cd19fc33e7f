//! Binary resolution for Redis Memory Server.
//!
//! This module turns [`BinaryOptions`] into the path of a redis-server
//! executable: a system binary if one is configured and present, a previous
//! resolution from the [`BinaryCache`], or a fresh download performed by a
//! [`BinaryProvider`] under a cross-process [`DownloadLock`].
//!
//! # Components
//!
//! * `cache` - process-local map from version to executable
//! * `lock` - `<version>.lock` files guarding a download directory
//! * `download_dir` - default download directory discovery
//! * `system` - probing and version checks of pre-installed binaries
//! * `resolver` - the resolution order tying the above together
mod cache;
mod download_dir;
mod lock;
mod resolver;
mod system;

pub use cache::{BinaryCache, ResolvedBinary};
pub use download_dir::{
    BINARIES_DIR, CACHE_NAME, find_cache_dir, legacy_download_dir, resolve_download_dir,
};
pub use lock::{DownloadLock, LockOptions};
pub use resolver::{
    BinaryOptions, BinaryProvider, BinaryResolver, LATEST_VERSION, ResolvedBinaryOptions,
};
pub use system::{parse_version_output, probe_system_binary, system_binary_version};
