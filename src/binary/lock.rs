//! Cross-process download lock.
//!
//! A lock is a file created with `O_EXCL` next to the downloaded versions
//! (`<downloadDir>/<version>.lock`). Waiting is bounded and a lock file whose
//! modification time is older than the stale threshold is taken over, so a
//! crashed holder cannot block other processes forever. The holder refreshes
//! the modification time while it works.
//!
//! Removing a lock file, whether stale or on release, happens under an
//! advisory lock on `<version>.lock.guard`, so a takeover only ever removes
//! the file it judged stale. The kernel drops the guard with its holder.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Wait and staleness thresholds of a [`DownloadLock`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Give up after waiting this long.
    pub wait: Duration,
    /// Delay between attempts.
    pub poll_period: Duration,
    /// A lock file untouched for this long is considered abandoned.
    pub stale: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        // Building redis from source takes a while.
        Self {
            wait: Duration::from_secs(120),
            poll_period: Duration::from_millis(100),
            stale: Duration::from_secs(110),
        }
    }
}

/// Exclusive ownership of a download lock file.
///
/// Dropping the lock releases it; [`DownloadLock::release`] does the same
/// asynchronously and logs the outcome.
#[derive(Debug)]
pub struct DownloadLock {
    path: PathBuf,
    token: String,
    heartbeat: Option<JoinHandle<()>>,
    released: bool,
}

impl DownloadLock {
    /// Path of the lock file for `version` inside `download_dir`.
    pub fn path_for(download_dir: &Path, version: &str) -> PathBuf {
        download_dir.join(format!("{}.lock", version))
    }

    /// Acquires the lock at `path` with the default thresholds.
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        Self::acquire_with(path, LockOptions::default()).await
    }

    /// Acquires the lock at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` when the wait deadline passes or the lock file
    /// cannot be created for a reason other than contention.
    #[tracing::instrument(skip(path, options), fields(lock = tracing::field::Empty))]
    pub async fn acquire_with(path: impl Into<PathBuf>, options: LockOptions) -> Result<Self> {
        let path = path.into();
        tracing::Span::current().record("lock", tracing::field::display(path.display()));
        let token = format!("{}:{}", std::process::id(), Uuid::new_v4());
        let deadline = Instant::now() + options.wait;

        loop {
            match try_create(&path, &token).await {
                Ok(()) => {
                    tracing::debug!("Download lock acquired");
                    let heartbeat = spawn_heartbeat(path.clone(), options.stale);
                    return Ok(Self {
                        path,
                        token,
                        heartbeat: Some(heartbeat),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let lock = path.clone();
                    let stale = options.stale;
                    let removed =
                        tokio::task::spawn_blocking(move || remove_if_stale(&lock, stale))
                            .await
                            .map_err(|e| Error::Lock(format!("stale lock check failed: {}", e)))?;
                    match removed {
                        Ok(true) => {
                            tracing::warn!("Removed stale download lock");
                            continue;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            return Err(Error::Lock(format!(
                                "Failed to remove stale lock {}: {}",
                                path.display(),
                                e
                            )));
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::Lock(format!(
                            "Timed out after {:?} waiting for {}",
                            options.wait,
                            path.display()
                        )));
                    }
                    tokio::time::sleep(options.poll_period).await;
                }
                Err(e) => {
                    return Err(Error::Lock(format!(
                        "Failed to create lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock.
    pub async fn release(mut self) {
        self.released = true;
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        let path = self.path.clone();
        let token = self.token.clone();
        let outcome = tokio::task::spawn_blocking(move || remove_if_owned(&path, &token)).await;
        match outcome {
            Ok(Ok(())) => tracing::debug!(lock = %self.path.display(), "Download lock removed"),
            Ok(Err(e)) => {
                tracing::debug!(lock = %self.path.display(), error = %e, "Error when removing download lock")
            }
            Err(e) => tracing::debug!(error = %e, "Download lock release task failed"),
        }
    }
}

impl Drop for DownloadLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Err(e) = remove_if_owned(&self.path, &self.token) {
            tracing::debug!(lock = %self.path.display(), error = %e, "Error when removing download lock");
        }
    }
}

async fn try_create(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(token.as_bytes()).await?;
    file.flush().await
}

/// Path of the guard serializing removals of the lock file at `path`.
fn guard_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".guard");
    PathBuf::from(name)
}

/// Runs `f` while holding an exclusive advisory lock on the guard of `path`.
fn with_guard<T>(path: &Path, f: impl FnOnce() -> std::io::Result<T>) -> std::io::Result<T> {
    let guard = File::options()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(guard_path(path))?;
    fs2::FileExt::lock_exclusive(&guard)?;
    // Closing the guard releases it.
    f()
}

fn is_stale(path: &Path, stale: Duration) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > stale),
        Err(_) => false,
    }
}

/// Removes the lock file at `path` if it is older than `stale`.
///
/// Creation never replaces an existing file and every removal holds the guard,
/// so the file checked here is the file removed.
fn remove_if_stale(path: &Path, stale: Duration) -> std::io::Result<bool> {
    with_guard(path, || {
        if !is_stale(path, stale) {
            return Ok(false);
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    })
}

fn remove_if_owned(path: &Path, token: &str) -> std::io::Result<()> {
    with_guard(path, || match std::fs::read_to_string(path) {
        Ok(content) if content == token => std::fs::remove_file(path),
        Ok(_) => {
            tracing::warn!(lock = %path.display(), "Download lock was taken over, leaving it in place");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    })
}

/// Keeps the lock file's mtime fresh so long builds are not mistaken for stale locks.
fn spawn_heartbeat(path: PathBuf, stale: Duration) -> JoinHandle<()> {
    let period = (stale / 4).max(Duration::from_millis(50));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let touched = File::options()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_modified(SystemTime::now()));
            if let Err(e) = touched {
                tracing::debug!(lock = %path.display(), error = %e, "Failed to refresh download lock");
                break;
            }
        }
    })
}
