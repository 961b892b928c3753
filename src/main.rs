use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fuser::MountOption;
use tracing_subscriber::EnvFilter;

use httpfs_core::config::CoreConfigBuilder;
use httpfs_core::context::CoreContext;
use httpfs_core::control;
use httpfs_core::fusefs::HttpFs;

/// Mounts registered HTTP(S) URLs as read-only files under `mountpoint`.
#[derive(Parser, Debug)]
#[command(name = "httpfs-mount", version)]
struct Args {
    /// Directory to mount the filesystem on.
    mountpoint: PathBuf,

    /// Address the registration control channel listens on.
    #[arg(long, default_value = "127.0.0.1:9000")]
    control_addr: SocketAddr,

    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    chunk_size: u64,

    #[arg(long, default_value_t = 200 * 1024 * 1024)]
    cache_cap_bytes: u64,

    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    prefetch_window_bytes: u64,

    #[arg(long, default_value_t = 8)]
    prefetch_batch_size: usize,

    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    open_warmup_bytes: u64,

    #[arg(long, default_value_t = 300)]
    idle_session_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    session_sweep_period_secs: u64,

    #[arg(long, default_value_t = 60)]
    fetch_timeout_secs: u64,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("HTTPFS_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = CoreConfigBuilder::new()
        .chunk_size(args.chunk_size)
        .cache_cap_bytes(args.cache_cap_bytes)
        .prefetch_window_bytes(args.prefetch_window_bytes)
        .prefetch_batch_size(args.prefetch_batch_size)
        .open_warmup_bytes(args.open_warmup_bytes)
        .idle_session_timeout(Duration::from_secs(args.idle_session_timeout_secs))
        .session_sweep_period(Duration::from_secs(args.session_sweep_period_secs))
        .fetch_timeout(Duration::from_secs(args.fetch_timeout_secs))
        .build();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let ctx = CoreContext::new(config);

    let _background = ctx.spawn_background();
    {
        let ctx = ctx.clone();
        let control_addr = args.control_addr;
        runtime.spawn(async move {
            if let Err(e) = control::serve(control_addr, ctx).await {
                tracing::error!(error = %e, "control channel exited");
            }
        });
    }

    let handle = runtime.handle().clone();
    let fs = HttpFs::new(ctx, handle);
    let options = vec![MountOption::RO, MountOption::FSName("httpfs".to_string())];

    let mountpoint = args.mountpoint.clone();
    let session = fuser::spawn_mount2(fs, &mountpoint, &options).map_err(|e| {
        tracing::error!(error = %e, mountpoint = %mountpoint.display(), "mount failed");
        e
    })?;

    runtime.block_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });
    tracing::info!("shutting down, unmounting");
    drop(session);
    Ok(())
}
