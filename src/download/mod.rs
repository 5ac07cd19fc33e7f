//! Download and installation of redis-server release archives.
//!
//! [`BinaryDownload`] drives the pipeline for one version: reuse an installed
//! executable if present, otherwise fetch the archive with [`ArchiveFetcher`],
//! build it with [`ArchiveInstaller`] and verify the result.
//! [`ArchiveDownloadProvider`] plugs the pipeline into the
//! [`BinaryResolver`](crate::binary::BinaryResolver).
mod fetcher;
mod installer;
mod progress;
mod url;

pub use fetcher::{ArchiveFetcher, DOWNLOADING_SUFFIX, PROXY_ENV_VARS, select_proxy};
pub use installer::{ArchiveInstaller, EXTRACT_DIR};
pub use progress::{DownloadProgress, PROGRESS_INTERVAL, ProgressReport};
pub use url::{DEFAULT_MIRROR, DownloadUrl};

use crate::binary::BinaryProvider;
use crate::config::ResolveConfig;
use crate::error::{DownloadError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the server executable.
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "redis-server";
#[cfg(windows)]
pub const BINARY_NAME: &str = "redis-server.exe";

/// Whether something exists at `path`, without following symlinks.
///
/// A dangling link counts as existing.
pub(crate) async fn location_exists(path: &Path) -> Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// The download pipeline for one version in one download directory.
pub struct BinaryDownload<'a> {
    download_dir: PathBuf,
    version: String,
    config: &'a ResolveConfig,
}

impl<'a> BinaryDownload<'a> {
    pub fn new(
        download_dir: impl Into<PathBuf>,
        version: impl Into<String>,
        config: &'a ResolveConfig,
    ) -> Self {
        Self {
            download_dir: download_dir.into(),
            version: version.into(),
            config,
        }
    }

    /// `<downloadDir>/<version>`
    pub fn version_dir(&self) -> PathBuf {
        self.download_dir.join(&self.version)
    }

    /// `<downloadDir>/<version>/redis-server`
    pub fn binary_path(&self) -> PathBuf {
        self.version_dir().join(BINARY_NAME)
    }

    /// Returns the installed executable, downloading and building it first if absent.
    ///
    /// Callers are expected to hold the download lock for this version.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(version = %self.version))]
    pub async fn get_redis_server_path(&self) -> Result<PathBuf> {
        let binary = self.binary_path();
        if location_exists(&binary).await? {
            tracing::debug!(path = %binary.display(), "Binary already installed");
            return Ok(binary);
        }

        let url = DownloadUrl::new(&self.version, self.config).download_url();
        let archive = ArchiveFetcher::new(&self.download_dir, &self.version, self.config)
            .download(&url)
            .await?;

        tokio::fs::create_dir_all(self.version_dir()).await?;
        ArchiveInstaller::new(self.version_dir(), BINARY_NAME)
            .install(&archive, &url)
            .await?;

        if location_exists(&binary).await? {
            return Ok(binary);
        }
        Err(DownloadError::MissingBinary { path: binary }.into())
    }
}

/// [`BinaryProvider`] downloading release archives from the configured mirror.
#[derive(Debug, Clone)]
pub struct ArchiveDownloadProvider {
    config: Arc<ResolveConfig>,
}

impl ArchiveDownloadProvider {
    pub fn new(config: Arc<ResolveConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BinaryProvider for ArchiveDownloadProvider {
    async fn provide(&self, version: &str, download_dir: &Path) -> Result<PathBuf> {
        BinaryDownload::new(download_dir, version, &self.config)
            .get_redis_server_path()
            .await
    }
}
