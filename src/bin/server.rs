use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use target_finder::config::Config;
use target_finder::logging::init_logging;
use target_finder::pipeline::Pipeline;
use target_finder::registry::DetectorRegistry;
use target_finder::server::{create_router, AppState};

/// 物体検出の融合APIサーバー
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 設定ファイル (TOML)
    #[arg(long, env = "TARGET_FINDER_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    info!(
        "{} detectors configured, default threshold {}",
        config.detectors.len(),
        config.default_threshold
    );

    // モデルは起動時に一度だけ読み込み、以後は読み取り専用で共有する
    let registry = Arc::new(DetectorRegistry::from_config(&config)?);
    info!("{} detectors enabled", registry.enabled_count());
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&registry), config.default_threshold));

    let state = AppState::new(Arc::clone(&pipeline)).with_debug_dump(config.server.debug_dump.clone());
    let app = create_router(state, config.server.max_body_size);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid bind address")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("can't bind {}", addr))?;
        info!("listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")
    })?;
    drop(runtime);

    // blocking HTTPクライアントはランタイムの外で破棄する
    drop(pipeline);
    drop(registry);
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("can't install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
