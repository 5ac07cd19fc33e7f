use crate::error::{DownloadError, Error, Result};
use async_process::{Command, Stdio};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

/// Directory name, inside a version dir, that archives are extracted to.
pub const EXTRACT_DIR: &str = "extracted";

/// Extracts a source archive and builds the executable out of it.
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    version_dir: PathBuf,
    binary_name: String,
}

impl ArchiveInstaller {
    /// Installer placing `binary_name` into `version_dir`.
    pub fn new(version_dir: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            version_dir: version_dir.into(),
            binary_name: binary_name.into(),
        }
    }

    /// Directory the archive is unpacked into.
    pub fn extract_dir(&self) -> PathBuf {
        self.version_dir.join(EXTRACT_DIR)
    }

    /// Final location of the installed executable.
    pub fn binary_path(&self) -> PathBuf {
        self.version_dir.join(&self.binary_name)
    }

    /// Extracts `archive`, builds it and copies the executable into place.
    ///
    /// The extraction directory and the archive are removed on success. On
    /// failure the extraction directory is removed and the archive kept.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(version_dir = %self.version_dir.display()))]
    pub async fn install(&self, archive: &Path, url: &str) -> Result<PathBuf> {
        let extract_dir = self.extract(archive, url).await?;

        let installed = match self.build(&extract_dir).await {
            Ok(()) => self.copy_binary(&extract_dir).await,
            Err(e) => Err(e),
        };
        let binary = match installed {
            Ok(binary) => binary,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&extract_dir).await;
                return Err(e);
            }
        };

        tokio::fs::remove_dir_all(&extract_dir).await?;
        tokio::fs::remove_file(archive).await?;
        tracing::debug!(binary = %binary.display(), "Installed binary, removed transient files");

        Ok(binary)
    }

    /// Unpacks `archive` into [`ArchiveInstaller::extract_dir`], dropping the
    /// archive's top-level directory.
    ///
    /// # Errors
    ///
    /// `DownloadError::UnsupportedArchive` for anything but `.tar.gz` / `.tgz`.
    pub async fn extract(&self, archive: &Path, url: &str) -> Result<PathBuf> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !(name.ends_with(".tar.gz") || name.ends_with(".tgz")) {
            return Err(DownloadError::UnsupportedArchive {
                archive: archive.to_path_buf(),
                url: url.to_string(),
            }
            .into());
        }

        let extract_dir = self.extract_dir();
        if super::location_exists(&extract_dir).await? {
            tokio::fs::remove_dir_all(&extract_dir).await?;
        }
        tokio::fs::create_dir_all(&extract_dir).await?;
        tracing::debug!(archive = %archive.display(), to = %extract_dir.display(), "Extracting archive");

        let archive = archive.to_path_buf();
        let target = extract_dir.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || unpack_tar_gz(&archive, &target, &url))
            .await
            .map_err(|e| Error::Other(format!("extraction task failed: {}", e)))??;

        Ok(extract_dir)
    }

    async fn copy_binary(&self, source_dir: &Path) -> Result<PathBuf> {
        let binary = self.binary_path();
        tokio::fs::copy(source_dir.join("src").join(&self.binary_name), &binary)
            .await
            .map_err(|e| {
                DownloadError::BuildFailed(format!(
                    "{} missing from build output: {}",
                    self.binary_name, e
                ))
            })?;
        make_executable(&binary).await?;
        Ok(binary)
    }

    async fn build(&self, source_dir: &Path) -> Result<()> {
        tracing::info!(dir = %source_dir.display(), "Building redis-server with make");
        let output = Command::new("make")
            .current_dir(source_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DownloadError::BuildFailed(format!("failed to run make: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(DownloadError::BuildFailed(format!(
                "make exited with {}: {}",
                output.status,
                tail.join("\n")
            ))
            .into());
        }
        Ok(())
    }
}

fn unpack_tar_gz(archive: &Path, target: &Path, url: &str) -> Result<()> {
    let unsupported = || DownloadError::UnsupportedArchive {
        archive: archive.to_path_buf(),
        url: url.to_string(),
    };

    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let entries = tar.entries().map_err(|_| unsupported())?;

    for entry in entries {
        let mut entry = entry.map_err(|_| unsupported())?;
        let path = entry.path().map_err(|_| unsupported())?.into_owned();

        let Some(relative) = strip_first_component(&path) else {
            continue;
        };
        let destination = target.join(relative);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(destination)?;
    }
    Ok(())
}

/// Drops the first path component. Returns `None` for the top-level entry
/// itself and for paths escaping the target.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    components.next()?;

    let mut stripped = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => stripped.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!stripped.as_os_str().is_empty()).then_some(stripped)
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
