use super::parser::ProjectConfig;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Prefix of the environment variables read by [`ResolveConfig`].
pub const ENV_CONFIG_PREFIX: &str = "REDISMS_";

/// Named options understood by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Directory holding downloaded binaries.
    DownloadDir,
    /// redis version to download (`stable` by default).
    Version,
    /// Path of a pre-installed redis-server to use instead of downloading.
    SystemBinary,
    /// Base URL of the release mirror.
    DownloadMirror,
    /// Full archive URL, overrides the mirror.
    DownloadUrl,
    /// Expected SHA-256 of the archive.
    DownloadSha256,
    /// Reject invalid TLS certificates while downloading.
    ///
    /// On unless set to a false value such as `false` or `0`.
    StrictSsl,
    /// Skip the in-process binary cache.
    IgnoreDownloadCache,
    /// Enable debug logging of the library.
    Debug,
    /// Skip the binary prefetch of the CLI.
    DisablePostinstall,
    /// Path of the orphan watchdog executable.
    WatchdogBinary,
    /// Port used by the CLI.
    Port,
}

impl ConfigKey {
    /// Every key, in declaration order.
    pub const ALL: [ConfigKey; 12] = [
        ConfigKey::DownloadDir,
        ConfigKey::Version,
        ConfigKey::SystemBinary,
        ConfigKey::DownloadMirror,
        ConfigKey::DownloadUrl,
        ConfigKey::DownloadSha256,
        ConfigKey::StrictSsl,
        ConfigKey::IgnoreDownloadCache,
        ConfigKey::Debug,
        ConfigKey::DisablePostinstall,
        ConfigKey::WatchdogBinary,
        ConfigKey::Port,
    ];

    /// SCREAMING_SNAKE name, used after [`ENV_CONFIG_PREFIX`].
    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::DownloadDir => "DOWNLOAD_DIR",
            ConfigKey::Version => "VERSION",
            ConfigKey::SystemBinary => "SYSTEM_BINARY",
            ConfigKey::DownloadMirror => "DOWNLOAD_MIRROR",
            ConfigKey::DownloadUrl => "DOWNLOAD_URL",
            ConfigKey::DownloadSha256 => "DOWNLOAD_SHA256",
            ConfigKey::StrictSsl => "STRICT_SSL",
            ConfigKey::IgnoreDownloadCache => "IGNORE_DOWNLOAD_CACHE",
            ConfigKey::Debug => "DEBUG",
            ConfigKey::DisablePostinstall => "DISABLE_POSTINSTALL",
            ConfigKey::WatchdogBinary => "WATCHDOG_BINARY",
            ConfigKey::Port => "PORT",
        }
    }

    /// Full environment variable name, e.g. `REDISMS_DOWNLOAD_DIR`.
    pub fn env_var(self) -> String {
        format!("{}{}", ENV_CONFIG_PREFIX, self.name())
    }

    /// camelCase name used in project configuration files.
    pub fn camel_case(self) -> String {
        let mut out = String::new();
        for (i, part) in self.name().split('_').enumerate() {
            let lower = part.to_ascii_lowercase();
            if i == 0 {
                out.push_str(&lower);
            } else {
                let mut chars = lower.chars();
                if let Some(first) = chars.next() {
                    out.push(first.to_ascii_uppercase());
                    out.extend(chars);
                }
            }
        }
        out
    }
}

/// Layered lookup of named options.
///
/// Resolution order is environment variable (`REDISMS_<KEY>`), then project
/// configuration files, then registered defaults. Empty values count as unset.
///
/// # Examples
///
/// ```
/// use redis_memory_server::config::{ConfigKey, ResolveConfig};
///
/// let config = ResolveConfig::empty()
///     .with_env(ConfigKey::Version, "7.2.4")
///     .with_default(ConfigKey::Version, "stable");
/// assert_eq!(config.get(ConfigKey::Version).as_deref(), Some("7.2.4"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResolveConfig {
    env: HashMap<String, String>,
    project: ProjectConfig,
    defaults: HashMap<ConfigKey, String>,
}

static GLOBAL_CONFIG: OnceLock<Arc<ResolveConfig>> = OnceLock::new();

impl ResolveConfig {
    /// A configuration with no sources at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a configuration from explicit sources.
    ///
    /// `env` is keyed by full variable name (`REDISMS_VERSION`).
    pub fn from_parts(env: HashMap<String, String>, project: ProjectConfig) -> Self {
        Self {
            env,
            project,
            defaults: HashMap::new(),
        }
    }

    /// Reads the process environment and the project files above `cwd`.
    pub fn load_from(cwd: &Path) -> Self {
        let env = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_CONFIG_PREFIX))
            .collect();
        Self::from_parts(env, ProjectConfig::discover(cwd))
    }

    /// Reads the process environment and the project files above the working directory.
    pub fn load() -> Self {
        match std::env::current_dir() {
            Ok(cwd) => Self::load_from(&cwd),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot determine working directory, skipping project configuration");
                Self::from_parts(
                    std::env::vars()
                        .filter(|(key, _)| key.starts_with(ENV_CONFIG_PREFIX))
                        .collect(),
                    ProjectConfig::new(),
                )
            }
        }
    }

    /// Process-wide configuration, loaded once on first use.
    pub fn global() -> Arc<ResolveConfig> {
        Arc::clone(GLOBAL_CONFIG.get_or_init(|| Arc::new(Self::load())))
    }

    /// Adds an environment-level value.
    pub fn with_env(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.env.insert(key.env_var(), value.into());
        self
    }

    /// Adds a project-file-level value.
    pub fn with_project_value(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.project.set(key.camel_case(), value);
        self
    }

    /// Registers a default value.
    pub fn with_default(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.set_default(key, value);
        self
    }

    /// Registers a default value for `key`.
    pub fn set_default(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.defaults.insert(key, value.into());
    }

    /// Resolves `key`.
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        let non_empty = |v: &&str| !v.is_empty();
        self.env
            .get(&key.env_var())
            .map(String::as_str)
            .filter(non_empty)
            .or_else(|| self.project.get(&key.camel_case()).filter(non_empty))
            .or_else(|| self.defaults.get(&key).map(String::as_str).filter(non_empty))
            .map(str::to_string)
    }

    /// Resolves `key` and interprets it with [`env_to_bool`].
    pub fn get_bool(&self, key: ConfigKey) -> bool {
        self.get(key).is_some_and(|value| env_to_bool(&value))
    }

    /// Whether `key` has any non-empty value.
    pub fn is_set(&self, key: ConfigKey) -> bool {
        self.get(key).is_some()
    }
}

/// Converts `1`, `on`, `yes`, `true` (any case) to `true`, anything else to `false`.
pub fn env_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "on" | "yes" | "true"
    )
}
