mod common;

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::eq;
use redis_memory_server::binary::{
    BinaryCache, BinaryOptions, BinaryProvider, BinaryResolver, DownloadLock, LockOptions,
};
use redis_memory_server::config::{ConfigKey, ResolveConfig};
use redis_memory_server::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mock! {
    pub Provider {}

    #[async_trait]
    impl BinaryProvider for Provider {
        async fn provide(&self, version: &str, download_dir: &Path) -> Result<PathBuf>;
    }
}

fn options(version: &str, download_dir: &Path) -> BinaryOptions {
    BinaryOptions {
        version: Some(version.to_string()),
        download_dir: Some(download_dir.to_path_buf()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_second_resolve_is_served_from_cache() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let expected = dir.path().join("7.2.4").join("redis-server");

    let mut provider = MockProvider::new();
    let returned = expected.clone();
    provider
        .expect_provide()
        .with(eq("7.2.4"), eq(dir.path().to_path_buf()))
        .times(1)
        .returning(move |_, _| Ok(returned.clone()));

    let cache = Arc::new(BinaryCache::new());
    let resolver = BinaryResolver::new(
        Arc::new(ResolveConfig::empty()),
        Arc::clone(&cache),
        Arc::new(provider),
    )
    .with_working_dir(dir.path());

    assert_eq!(resolver.resolve(&options("7.2.4", dir.path())).await?, expected);
    assert_eq!(resolver.resolve(&options("7.2.4", dir.path())).await?, expected);
    assert_eq!(cache.len(), 1);

    // The lock file does not outlive the download.
    assert!(!DownloadLock::path_for(dir.path(), "7.2.4").exists());
    Ok(())
}

#[tokio::test]
async fn test_ignore_cache_downloads_again() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut provider = MockProvider::new();
    provider
        .expect_provide()
        .times(2)
        .returning(|version, dir| Ok(dir.join(version).join("redis-server")));

    let resolver = BinaryResolver::new(
        Arc::new(ResolveConfig::empty().with_env(ConfigKey::IgnoreDownloadCache, "true")),
        Arc::new(BinaryCache::new()),
        Arc::new(provider),
    )
    .with_working_dir(dir.path());

    resolver.resolve(&options("7.2.4", dir.path())).await?;
    resolver.resolve(&options("7.2.4", dir.path())).await?;
    Ok(())
}

/// Counts calls and holds the lock long enough for others to queue up.
struct SlowProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl BinaryProvider for SlowProvider {
    async fn provide(&self, version: &str, download_dir: &Path) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(download_dir.join(version).join("redis-server"))
    }
}

#[tokio::test]
async fn test_concurrent_resolves_download_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
    });
    let resolver = Arc::new(
        BinaryResolver::new(
            Arc::new(ResolveConfig::empty()),
            Arc::new(BinaryCache::new()),
            Arc::clone(&provider) as Arc<dyn BinaryProvider>,
        )
        .with_working_dir(dir.path()),
    );

    let opts = options("7.2.4", dir.path());
    let results = futures::future::join_all((0..4).map(|_| resolver.resolve(&opts))).await;

    let paths: Vec<PathBuf> = results.into_iter().collect::<Result<_>>()?;
    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Installs a file the way a download does, skipping the work when it exists.
struct InstallingProvider {
    installs: AtomicUsize,
}

#[async_trait]
impl BinaryProvider for InstallingProvider {
    async fn provide(&self, version: &str, download_dir: &Path) -> Result<PathBuf> {
        let binary = download_dir.join(version).join("redis-server");
        if tokio::fs::try_exists(&binary).await? {
            return Ok(binary);
        }
        self.installs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::fs::create_dir_all(download_dir.join(version)).await?;
        tokio::fs::write(&binary, "#!/bin/sh\n").await?;
        Ok(binary)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resolvers_without_shared_cache_install_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = Arc::new(InstallingProvider {
        installs: AtomicUsize::new(0),
    });
    let resolver = |provider: &Arc<InstallingProvider>| {
        BinaryResolver::new(
            Arc::new(ResolveConfig::empty()),
            Arc::new(BinaryCache::new()),
            Arc::clone(provider) as Arc<dyn BinaryProvider>,
        )
        .with_working_dir(dir.path())
    };
    let first = resolver(&provider);
    let second = resolver(&provider);

    let opts = options("7.2.4", dir.path());
    let (a, b) = futures::join!(first.resolve(&opts), second.resolve(&opts));

    assert_eq!(a?, b?);
    assert_eq!(provider.installs.load(Ordering::SeqCst), 1);
    assert!(!DownloadLock::path_for(dir.path(), "7.2.4").exists());
    Ok(())
}

#[tokio::test]
async fn test_provider_error_releases_lock() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut provider = MockProvider::new();
    provider
        .expect_provide()
        .times(1)
        .returning(|_, _| Err(Error::Resolution("boom".to_string())));

    let cache = Arc::new(BinaryCache::new());
    let resolver = BinaryResolver::new(
        Arc::new(ResolveConfig::empty()),
        Arc::clone(&cache),
        Arc::new(provider),
    )
    .with_working_dir(dir.path());

    assert!(resolver.resolve(&options("7.2.4", dir.path())).await.is_err());
    assert!(!DownloadLock::path_for(dir.path(), "7.2.4").exists());
    assert!(cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_lock_times_out_while_held() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = DownloadLock::path_for(dir.path(), "7.2.4");
    let options = LockOptions {
        wait: Duration::from_millis(200),
        poll_period: Duration::from_millis(20),
        stale: Duration::from_secs(60),
    };

    let held = DownloadLock::acquire_with(&path, options).await?;
    let err = DownloadLock::acquire_with(&path, options).await.unwrap_err();
    assert!(matches!(err, Error::Lock(_)));

    held.release().await;
    let again = DownloadLock::acquire_with(&path, options).await?;
    again.release().await;
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn test_stale_lock_is_taken_over() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = DownloadLock::path_for(dir.path(), "7.2.4");
    std::fs::write(&path, "12345:abandoned")?;
    let old = std::time::SystemTime::now() - Duration::from_secs(600);
    std::fs::File::options()
        .write(true)
        .open(&path)?
        .set_modified(old)?;

    let lock = DownloadLock::acquire_with(
        &path,
        LockOptions {
            wait: Duration::from_secs(1),
            poll_period: Duration::from_millis(20),
            stale: Duration::from_secs(110),
        },
    )
    .await?;
    assert_ne!(std::fs::read_to_string(&path)?, "12345:abandoned");
    lock.release().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_takeovers_of_stale_lock_are_exclusive() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = DownloadLock::path_for(dir.path(), "7.2.4");
    let options = LockOptions {
        wait: Duration::from_secs(10),
        poll_period: Duration::from_millis(5),
        stale: Duration::from_secs(110),
    };
    let max_holders = Arc::new(AtomicUsize::new(0));

    for _ in 0..25 {
        std::fs::write(&path, "12345:abandoned")?;
        let old = std::time::SystemTime::now() - Duration::from_secs(600);
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(old)?;

        let holders = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let holders = Arc::clone(&holders);
                let max_holders = Arc::clone(&max_holders);
                tokio::spawn(async move {
                    let lock = DownloadLock::acquire_with(&path, options).await?;
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holders.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    lock.release().await;
                    Ok::<_, Error>(())
                })
            })
            .collect();

        for task in tasks {
            task.await.map_err(|e| Error::Other(e.to_string()))??;
        }
        assert!(!path.exists());
    }

    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_system_binary_wins() -> Result<()> {
    use common::{FakeRedis, NoDownloads, write_fake_redis};

    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::Ready);
    let resolver = BinaryResolver::new(
        Arc::new(ResolveConfig::empty()),
        Arc::new(BinaryCache::new()),
        Arc::new(NoDownloads),
    )
    .with_working_dir(dir.path());

    // A version mismatch only warns.
    let path = resolver
        .resolve(&BinaryOptions {
            version: Some("6.0.10".to_string()),
            system_binary: Some(binary.clone()),
            ..Default::default()
        })
        .await?;
    assert_eq!(path, binary);
    Ok(())
}

#[tokio::test]
async fn test_missing_system_binary_falls_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut provider = MockProvider::new();
    provider
        .expect_provide()
        .times(1)
        .returning(|version, dir| Ok(dir.join(version).join("redis-server")));

    let resolver = BinaryResolver::new(
        Arc::new(
            ResolveConfig::empty()
                .with_project_value(ConfigKey::SystemBinary, "/nonexistent/redis-server"),
        ),
        Arc::new(BinaryCache::new()),
        Arc::new(provider),
    )
    .with_working_dir(dir.path());

    let path = resolver.resolve(&options("7.2.4", dir.path())).await?;
    assert_eq!(path, dir.path().join("7.2.4").join("redis-server"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_version_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resolver = BinaryResolver::new(
        Arc::new(ResolveConfig::empty()),
        Arc::new(BinaryCache::new()),
        Arc::new(MockProvider::new()),
    )
    .with_working_dir(dir.path());

    let err = resolver
        .resolve(&options("../escape", dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid(_)));
    Ok(())
}

#[tokio::test]
async fn test_default_download_dir_is_project_scoped() -> Result<()> {
    let project = assert_fs::TempDir::new().map_err(|e| Error::Other(e.to_string()))?;
    std::fs::write(project.path().join("Cargo.toml"), "[package]\n")?;
    let nested = project.path().join("src").join("nested");
    std::fs::create_dir_all(&nested)?;

    let resolver = BinaryResolver::new(
        Arc::new(ResolveConfig::empty()),
        Arc::new(BinaryCache::new()),
        Arc::new(MockProvider::new()),
    )
    .with_working_dir(&nested);

    let effective = resolver.effective_options(&BinaryOptions::default())?;
    assert_eq!(effective.version, "stable");
    if !dirs::home_dir().is_some_and(|home| home.join(".cache/redis-binaries").exists()) {
        assert_eq!(
            effective.download_dir,
            project
                .path()
                .join("target/.cache/redis-memory-server/redis-binaries")
        );
    }
    Ok(())
}
