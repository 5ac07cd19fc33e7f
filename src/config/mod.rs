//! Configuration module for Redis Memory Server.
//!
//! Options are looked up by name through [`ResolveConfig`]: first the
//! `REDISMS_<NAME>` environment variable, then project configuration files
//! (`redis-memory-server.json` / `.yaml` found walking up from the working
//! directory), then registered defaults.
//!
//! # Examples
//!
//! Reading the process-wide configuration:
//!
//! ```no_run
//! use redis_memory_server::config::{ConfigKey, ResolveConfig};
//!
//! let config = ResolveConfig::global();
//! if let Some(version) = config.get(ConfigKey::Version) {
//!     println!("Configured redis version: {}", version);
//! }
//! ```
//!
//! Building a configuration programmatically (handy in tests):
//!
//! ```
//! use redis_memory_server::config::{ConfigKey, ResolveConfig};
//!
//! let config = ResolveConfig::empty()
//!     .with_project_value(ConfigKey::DownloadMirror, "https://mirror.example.com")
//!     .with_env(ConfigKey::StrictSsl, "yes");
//! assert!(config.get_bool(ConfigKey::StrictSsl));
//! ```
mod parser;
mod resolver;
pub mod validator;

pub use parser::{CONFIG_FILE_NAMES, ProjectConfig};
pub use resolver::{ConfigKey, ENV_CONFIG_PREFIX, ResolveConfig, env_to_bool};
pub use validator::{validate_binary_options, validate_instance_options};
