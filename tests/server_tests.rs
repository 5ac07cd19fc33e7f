#![cfg(unix)]

mod common;

use common::{FakeRedis, fake_resolver, write_fake_redis};
use redis_memory_server::error::{Error, Result};
use redis_memory_server::server::{
    InstanceOptions, InstanceState, RedisInstance, RedisInstanceOptions, SpawnOptions, is_alive,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

fn options(port: u16) -> RedisInstanceOptions {
    RedisInstanceOptions {
        instance: InstanceOptions {
            port: Some(port),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn wait_until_dead(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !is_alive(pid)
}

#[tokio::test]
async fn test_run_and_kill() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::Ready);
    let resolver = fake_resolver(&binary, dir.path());

    let instance = RedisInstance::run(options(27333), &resolver).await?;
    assert_eq!(instance.state(), InstanceState::Ready);

    let pid = instance.pid().expect("server pid");
    let watchdog_pid = instance.watchdog_pid().expect("watchdog pid");
    assert!(is_alive(pid));
    assert!(is_alive(watchdog_pid));

    instance.kill().await?;
    assert_eq!(instance.state(), InstanceState::Stopped);
    assert_eq!(instance.pid(), None);
    assert_eq!(instance.watchdog_pid(), None);
    assert!(wait_until_dead(pid, Duration::from_secs(2)).await);

    Ok(())
}

#[tokio::test]
async fn test_non_utf8_output_before_banner() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::NonUtf8Output);
    let resolver = fake_resolver(&binary, dir.path());

    let instance = tokio::time::timeout(
        Duration::from_secs(5),
        RedisInstance::run(options(27340), &resolver),
    )
    .await
    .map_err(|_| Error::Other("instance never became ready".to_string()))??;
    assert_eq!(instance.state(), InstanceState::Ready);

    instance.kill().await?;
    Ok(())
}

#[tokio::test]
async fn test_arguments_and_environment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::Ready);
    let resolver = fake_resolver(&binary, dir.path());
    let args_file = dir.path().join("args.txt");

    let mut opts = options(27334);
    opts.instance.args = vec!["--maxmemory".to_string(), "1mb".to_string()];
    opts.spawn = SpawnOptions {
        env: HashMap::from([(
            "FAKE_REDIS_ARGS".to_string(),
            args_file.to_string_lossy().to_string(),
        )]),
        cwd: Some(dir.path().to_path_buf()),
    };

    let instance = RedisInstance::run(opts, &resolver).await?;
    let recorded = std::fs::read_to_string(&args_file)?;
    instance.kill().await?;

    let lines: Vec<&str> = recorded.lines().collect();
    assert_eq!(
        lines,
        [
            "--save",
            "",
            "--appendonly",
            "no",
            "--bind",
            "127.0.0.1",
            "--port",
            "27334",
            "--maxmemory",
            "1mb"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_port_conflict_is_classified() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::PortConflict);
    let resolver = fake_resolver(&binary, dir.path());

    let err = RedisInstance::run(options(27335), &resolver)
        .await
        .err()
        .expect("start must fail");

    assert!(err.is_port_conflict());
    assert_eq!(err.to_string(), "Port 27335 already in use");
    Ok(())
}

#[tokio::test]
async fn test_permission_denied_is_classified() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::PermissionDenied);
    let resolver = fake_resolver(&binary, dir.path());

    let err = RedisInstance::run(options(27336), &resolver)
        .await
        .err()
        .expect("start must fail");

    match err {
        Error::Process(reason) => assert_eq!(reason, "redis-server permission denied"),
        other => panic!("unexpected error: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_exit_before_ready_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::ExitsImmediately);
    let resolver = fake_resolver(&binary, dir.path());

    let err = RedisInstance::run(options(27337), &resolver)
        .await
        .err()
        .expect("start must fail");

    assert!(matches!(err, Error::Process(_)));
    assert!(!err.is_port_conflict());
    Ok(())
}

#[tokio::test]
async fn test_kill_escalates_to_sigkill() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::IgnoresInterrupt);
    let resolver = fake_resolver(&binary, dir.path());

    let mut instance = RedisInstance::run(options(27338), &resolver).await?;
    instance.set_kill_timeout(Duration::from_millis(500));
    let pid = instance.pid().expect("server pid");

    let started = Instant::now();
    instance.kill().await?;

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(wait_until_dead(pid, Duration::from_secs(2)).await);
    Ok(())
}

#[tokio::test]
async fn test_invalid_bind_address_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let binary = write_fake_redis(dir.path(), FakeRedis::Ready);
    let resolver = fake_resolver(&binary, dir.path());

    let mut opts = options(27339);
    opts.instance.ip = Some("127.0.0.1 --port 1".to_string());

    let err = RedisInstance::run(opts, &resolver).await.err().expect("invalid ip");
    assert!(matches!(err, Error::ConfigInvalid(_)));
    Ok(())
}
