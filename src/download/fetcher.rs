use super::progress::DownloadProgress;
use crate::config::{ConfigKey, ResolveConfig};
use crate::error::{DownloadError, Result};
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;

/// Proxy environment variables, highest priority first.
pub const PROXY_ENV_VARS: [&str; 8] = [
    "yarn_https-proxy",
    "yarn_proxy",
    "npm_config_https-proxy",
    "npm_config_proxy",
    "https_proxy",
    "http_proxy",
    "HTTPS_PROXY",
    "HTTP_PROXY",
];

/// Suffix of partially transferred archives.
pub const DOWNLOADING_SUFFIX: &str = ".downloading";

/// Returns the first proxy found by `lookup` in [`PROXY_ENV_VARS`] order.
pub fn select_proxy(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    PROXY_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.is_empty())
}

/// Downloads release archives into a download directory.
///
/// The archive is written to `<name>.downloading` and moved to its final name
/// only after the declared length (and the optional SHA-256) was verified. An
/// archive already present under its final name is reused without network
/// traffic.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    download_dir: PathBuf,
    version: String,
    proxy: Option<String>,
    strict_ssl: bool,
    expected_sha256: Option<String>,
}

impl ArchiveFetcher {
    /// Creates a fetcher reading TLS/checksum settings from `config` and the
    /// proxy from the process environment.
    pub fn new(download_dir: impl Into<PathBuf>, version: impl Into<String>, config: &ResolveConfig) -> Self {
        Self {
            download_dir: download_dir.into(),
            version: version.into(),
            proxy: select_proxy(|name| std::env::var(name).ok()),
            strict_ssl: config
                .get(ConfigKey::StrictSsl)
                .is_none_or(|value| crate::config::env_to_bool(&value)),
            expected_sha256: config
                .get(ConfigKey::DownloadSha256)
                .map(|sha| sha.trim().to_ascii_lowercase()),
        }
    }

    /// Overrides the proxy.
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Proxy that will be used, if any.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Whether invalid certificates are rejected.
    pub fn strict_ssl(&self) -> bool {
        self.strict_ssl
    }

    /// Downloads `download_url` and returns the archive location.
    ///
    /// # Errors
    ///
    /// * `DownloadError::InvalidUrl` if the URL has no host or file name
    /// * `DownloadError::NotFound` on HTTP 404
    /// * `DownloadError::Truncated` if fewer bytes than declared arrived
    #[tracing::instrument(skip(self), fields(version = %self.version))]
    pub async fn download(&self, download_url: &str) -> Result<PathBuf> {
        let url = Url::parse(download_url)
            .map_err(|e| DownloadError::InvalidUrl(format!("{} ({})", download_url, e)))?;
        if url.host_str().is_none() {
            return Err(DownloadError::InvalidUrl(download_url.to_string()).into());
        }

        let filename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                DownloadError::InvalidUrl(format!("missing filename for url {}", download_url))
            })?
            .to_string();

        let download_location = self.download_dir.join(&filename);
        let temp_location = self
            .download_dir
            .join(format!("{}{}", filename, DOWNLOADING_SUFFIX));

        match &self.proxy {
            Some(proxy) => tracing::info!(url = %download_url, proxy = %proxy, "Downloading via proxy"),
            None => tracing::info!(url = %download_url, "Downloading"),
        }

        if super::location_exists(&download_location).await? {
            tracing::debug!(archive = %download_location.display(), "Already downloaded archive found, skipping download");
            return Ok(download_location);
        }

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let result = self
            .http_download(url, &download_location, &temp_location)
            .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_location).await;
        }
        result
    }

    fn client(&self) -> std::result::Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("redis-memory-server/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!self.strict_ssl)
            .no_proxy();

        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())?.no_proxy(reqwest::NoProxy::from_env());
            builder = builder.proxy(proxy);
        }

        Ok(builder.build()?)
    }

    async fn http_download(
        &self,
        url: Url,
        download_location: &Path,
        temp_location: &Path,
    ) -> Result<PathBuf> {
        let url_string = url.to_string();
        let client = self.client()?;

        tracing::debug!(url = %url_string, "Trying to download");
        let mut response = client.get(url).send().await.map_err(|e| {
            tracing::error!(url = %url_string, error = %e, "Couldn't download");
            DownloadError::from(e)
        })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(DownloadError::NotFound { url: url_string }.into());
            }
            status => {
                return Err(DownloadError::BadStatus {
                    status: status.as_u16(),
                    url: url_string,
                }
                .into());
            }
        }

        let length = response
            .content_length()
            .ok_or_else(|| DownloadError::MissingContentLength {
                url: url_string.clone(),
            })?;

        let mut progress = DownloadProgress::new(length);
        let mut hasher = self.expected_sha256.as_ref().map(|_| Sha256::new());
        let mut file = tokio::fs::File::create(temp_location).await?;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) if progress.current() < length => {
                    tracing::debug!(error = %e, "Transfer interrupted");
                    break;
                }
                Err(e) => return Err(DownloadError::from(e).into()),
            };

            file.write_all(&chunk).await?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            if let Some(report) = progress.record(chunk.len(), Instant::now()) {
                tracing::info!("Downloading Redis {}: {}", self.version, report);
            }
        }

        file.flush().await?;
        drop(file);

        if progress.current() < length {
            return Err(DownloadError::Truncated {
                received: progress.current(),
                expected: length,
                url: url_string,
            }
            .into());
        }

        if let (Some(expected), Some(hasher)) = (&self.expected_sha256, hasher) {
            let actual = hex::encode(hasher.finalize());
            if &actual != expected {
                return Err(DownloadError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
        }

        tokio::fs::rename(temp_location, download_location).await?;
        tracing::debug!(
            from = %temp_location.display(),
            to = %download_location.display(),
            "Moved downloaded archive into place"
        );

        Ok(download_location.to_path_buf())
    }
}
