//! 服务入口
//!
//! 加载配置、初始化日志，启动侧信道 WebSocket 服务与 HTTP 服务

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use testcast::config::AppConfig;
use testcast::server::{run_server, AppState};
use testcast::ws::run_ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().context("加载配置失败")?;
    let port = config.server.port;
    let ws_port = config.server.ws_port;
    info!(
        "[Main] 上传目录: {}",
        config.server.upload_dir.display()
    );

    let state = AppState::new(config);

    // 侧信道 WebSocket 服务
    let hub = state.hub.clone();
    tokio::spawn(async move {
        if let Err(e) = run_ws_server(hub, ws_port).await {
            error!("[Main] 侧信道服务器异常退出: {}", e);
        }
    });

    run_server(state, port).await.context("HTTP 服务异常退出")?;
    Ok(())
}
