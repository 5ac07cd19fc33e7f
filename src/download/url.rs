use crate::config::{ConfigKey, ResolveConfig};

/// Mirror used when `DOWNLOAD_MIRROR` is not configured.
pub const DEFAULT_MIRROR: &str = "https://download.redis.io";

/// Builds the archive URL for a version.
///
/// # Examples
///
/// ```
/// use redis_memory_server::config::ResolveConfig;
/// use redis_memory_server::download::DownloadUrl;
///
/// let config = ResolveConfig::empty();
/// let url = DownloadUrl::new("6.0.10", &config);
/// assert_eq!(
///     url.download_url(),
///     "https://download.redis.io/releases/redis-6.0.10.tar.gz"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct DownloadUrl<'a> {
    version: &'a str,
    config: &'a ResolveConfig,
}

impl<'a> DownloadUrl<'a> {
    pub fn new(version: &'a str, config: &'a ResolveConfig) -> Self {
        Self { version, config }
    }

    /// Full URL to download.
    ///
    /// `DOWNLOAD_URL` replaces the whole URL, `DOWNLOAD_MIRROR` only the host part.
    pub fn download_url(&self) -> String {
        let archive = self.archive_name();
        tracing::debug!(archive = %archive, "Using archive name");

        if let Some(url) = self.config.get(ConfigKey::DownloadUrl) {
            tracing::debug!(url = %url, "Using configured download URL");
            return url;
        }

        let mirror = self
            .config
            .get(ConfigKey::DownloadMirror)
            .unwrap_or_else(|| DEFAULT_MIRROR.to_string());
        tracing::debug!(mirror = %mirror, "Using mirror");

        format!("{}/releases/{}", mirror.trim_end_matches('/'), archive)
    }

    /// Archive file name for the version on the current platform.
    ///
    /// redis publishes source tarballs with one name for every platform, so
    /// this is the place a platform-specific name would be chosen.
    pub fn archive_name(&self) -> String {
        format!("redis-{}.tar.gz", self.version)
    }
}
