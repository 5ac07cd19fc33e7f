//! Starts a Redis Memory Server instance and keeps it running until Ctrl-C.
//!
//! With `--prefetch` only the binary is resolved, which warms the download
//! cache before a test run.

use anyhow::{Context, Result};
use redis_memory_server::config::{ConfigKey, ResolveConfig};
use redis_memory_server::{
    BinaryOptions, BinaryResolver, InstanceOptions, RedisMemoryServer, RedisMemoryServerOptions,
    logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let config = ResolveConfig::global();

    if std::env::args().skip(1).any(|arg| arg == "--prefetch") {
        return prefetch(&config).await;
    }

    let port = config
        .get(ConfigKey::Port)
        .map(|port| port.parse::<u16>())
        .transpose()
        .context("REDISMS_PORT is not a valid port")?;

    let server = RedisMemoryServer::new(RedisMemoryServerOptions {
        instance: InstanceOptions {
            port,
            ..Default::default()
        },
        ..Default::default()
    });

    let host = server.get_host().await?;
    let port = server.get_port().await?;
    println!("Redis server running at: {}:{}", host, port);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    server.stop().await?;
    Ok(())
}

async fn prefetch(config: &ResolveConfig) -> Result<()> {
    if config.get_bool(ConfigKey::DisablePostinstall) {
        println!("Download is skipped by REDISMS_DISABLE_POSTINSTALL variable");
        return Ok(());
    }
    if config.is_set(ConfigKey::SystemBinary) {
        println!("Download is skipped by REDISMS_SYSTEM_BINARY variable");
        return Ok(());
    }

    println!("redis-memory-server: checking Redis binaries cache...");
    let path = BinaryResolver::global()
        .resolve(&BinaryOptions::default())
        .await
        .context("failed to download/install Redis binaries")?;
    println!("redis-memory-server: binary path is {}", path.display());
    Ok(())
}
