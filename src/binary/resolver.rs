use super::cache::{BinaryCache, ResolvedBinary};
use super::download_dir::{legacy_download_dir, resolve_download_dir};
use super::lock::DownloadLock;
use super::system::{probe_system_binary, system_binary_version};
use crate::config::{ConfigKey, ResolveConfig, validate_binary_options};
use crate::download::ArchiveDownloadProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version used when none is configured.
pub const LATEST_VERSION: &str = "stable";

/// Caller-supplied binary options. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryOptions {
    /// redis version to use.
    pub version: Option<String>,
    /// Directory holding downloaded versions.
    pub download_dir: Option<PathBuf>,
    /// Pre-installed redis-server to prefer over downloading.
    pub system_binary: Option<PathBuf>,
    /// Bypass the in-process cache.
    pub ignore_cache: bool,
}

/// Binary options after defaults were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinaryOptions {
    pub version: String,
    pub download_dir: PathBuf,
    pub system_binary: Option<PathBuf>,
    pub ignore_cache: bool,
}

/// Produces an executable for a version inside a download directory.
///
/// The default implementation is [`ArchiveDownloadProvider`], which fetches
/// and builds a release archive. Implementations must return quickly without
/// I/O beyond an existence check when the executable is already in place.
#[async_trait]
pub trait BinaryProvider: Send + Sync {
    /// Returns the path of the executable for `version`, installing it if needed.
    async fn provide(&self, version: &str, download_dir: &Path) -> Result<PathBuf>;
}

/// Resolves a usable redis-server executable.
///
/// Order: system binary override, in-process cache, then the provider under a
/// cross-process [`DownloadLock`]. All public methods are instrumented with
/// `tracing` spans.
///
/// # Examples
///
/// ```no_run
/// use redis_memory_server::binary::{BinaryOptions, BinaryResolver};
///
/// # async fn run() -> redis_memory_server::Result<()> {
/// let resolver = BinaryResolver::global();
/// let path = resolver
///     .resolve(&BinaryOptions {
///         version: Some("7.2.4".to_string()),
///         ..Default::default()
///     })
///     .await?;
/// println!("redis-server at {}", path.display());
/// # Ok(())
/// # }
/// ```
pub struct BinaryResolver {
    config: Arc<ResolveConfig>,
    cache: Arc<BinaryCache>,
    provider: Arc<dyn BinaryProvider>,
    cwd: Option<PathBuf>,
}

impl BinaryResolver {
    /// Creates a resolver from its collaborators.
    pub fn new(
        config: Arc<ResolveConfig>,
        cache: Arc<BinaryCache>,
        provider: Arc<dyn BinaryProvider>,
    ) -> Self {
        Self {
            config,
            cache,
            provider,
            cwd: None,
        }
    }

    /// Resolver using the process-wide configuration and cache, downloading from the mirror.
    pub fn global() -> Self {
        let config = ResolveConfig::global();
        let provider = Arc::new(ArchiveDownloadProvider::new(Arc::clone(&config)));
        Self::new(config, BinaryCache::global(), provider)
    }

    /// Uses `cwd` instead of the process working directory for default directory discovery.
    pub fn with_working_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// The configuration this resolver reads.
    pub fn config(&self) -> &Arc<ResolveConfig> {
        &self.config
    }

    /// The cache this resolver populates.
    pub fn cache(&self) -> &Arc<BinaryCache> {
        &self.cache
    }

    /// Applies configuration defaults to `opts`.
    pub fn effective_options(&self, opts: &BinaryOptions) -> Result<ResolvedBinaryOptions> {
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        let download_dir = match opts.download_dir.as_ref().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => cwd.join(dir),
            None => resolve_download_dir(
                self.config.get(ConfigKey::DownloadDir).as_deref(),
                legacy_download_dir().as_deref(),
                &cwd,
            ),
        };

        let version = opts
            .version
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| self.config.get(ConfigKey::Version))
            .unwrap_or_else(|| LATEST_VERSION.to_string());

        let system_binary = opts
            .system_binary
            .clone()
            .or_else(|| self.config.get(ConfigKey::SystemBinary).map(PathBuf::from));

        Ok(ResolvedBinaryOptions {
            version,
            download_dir,
            system_binary,
            ignore_cache: opts.ignore_cache || self.config.get_bool(ConfigKey::IgnoreDownloadCache),
        })
    }

    /// Returns a usable executable path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Resolution` if no path could be established, or the
    /// download/lock error that prevented it.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, opts))]
    pub async fn resolve(&self, opts: &BinaryOptions) -> Result<PathBuf> {
        let options = self.effective_options(opts)?;
        validate_binary_options(&options)?;
        tracing::debug!(options = ?options, "Resolving redis-server binary");

        if let Some(system_binary) = &options.system_binary {
            if let Some(path) = probe_system_binary(system_binary).await {
                self.check_system_version(&path, &options.version).await;
                tracing::debug!(path = %path.display(), "Using system binary");
                return Ok(path);
            }
        }

        if !options.ignore_cache {
            if let Some(cached) = self.cache.get(&options.version) {
                tracing::debug!(path = %cached.path.display(), "Using cached binary");
                return Ok(cached.path);
            }
        }

        let path = self.download_path(&options).await?;
        if path.as_os_str().is_empty() {
            return Err(Error::Resolution(format!(
                "no binary for version {} in {}",
                options.version,
                options.download_dir.display()
            )));
        }

        tracing::debug!(path = %path.display(), "redis-server binary path");
        Ok(path)
    }

    /// Runs the provider under the download lock and caches the result.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, options), fields(version = %options.version))]
    pub async fn download_path(&self, options: &ResolvedBinaryOptions) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&options.download_dir).await?;

        let lock_path = DownloadLock::path_for(&options.download_dir, &options.version);
        let lock = DownloadLock::acquire(lock_path).await?;

        let result = self.provide_locked(options).await;
        lock.release().await;
        result
    }

    async fn provide_locked(&self, options: &ResolvedBinaryOptions) -> Result<PathBuf> {
        // Another task of this process may have finished while we waited.
        if !options.ignore_cache {
            if let Some(cached) = self.cache.get(&options.version) {
                return Ok(cached.path);
            }
        }

        let path = self
            .provider
            .provide(&options.version, &options.download_dir)
            .await?;
        self.cache.insert(ResolvedBinary {
            version: options.version.clone(),
            path: path.clone(),
        });
        Ok(path)
    }

    async fn check_system_version(&self, path: &Path, requested: &str) {
        let Some(found) = system_binary_version(path).await else {
            tracing::warn!(path = %path.display(), "Could not determine system binary version");
            return;
        };

        if requested != LATEST_VERSION && requested != found {
            tracing::warn!(
                system_binary_version = %found,
                requested_version = %requested,
                "Possible version conflict, using system binary"
            );
        }
    }
}
