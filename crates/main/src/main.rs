//! 主应用程序入口
//!
//! 读取配置、选择存储后端并启动 Axum HTTP/WebSocket 服务。

use std::sync::Arc;

use anyhow::Context;
use application::ServiceContainer;
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;

    let infrastructure = Infrastructure::connect(&config.database)
        .await
        .context("初始化存储失败")?;
    tracing::info!(backend = infrastructure.backend(), "存储后端已就绪");

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let bind_address = config.bind_address();
    let services = ServiceContainer::new(config, infrastructure.storage());

    let shutdown = CancellationToken::new();
    let sweeper = services.spawn_sweeper(shutdown.clone());

    let app = router(AppState::new(services.clone(), jwt_service));
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("无法监听 {bind_address}"))?;

    tracing::info!("消息投递服务启动在 http://{}", bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!(error = %err, "清理任务异常退出");
    }
    services.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}
