//! 主应用程序入口
//!
//! 加载配置，组装存储后端与在线状态服务，启动 Axum Web 服务。

use application::BroadcastSettings;
use config::AppConfig;
use domain::{BoardDimensions, SessionId};
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{cors_layer, router, AppState, AppStateDependencies};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        backend = ?config.registry.backend,
        default_session = ?config.presence.default_session(),
        "配置加载完成"
    );

    let infra = Infrastructure::connect(&config.registry).await?;

    let state = AppState::new(AppStateDependencies {
        registry: infra.registry,
        store: infra.sessions,
        board: BoardDimensions {
            width: config.board.width,
            height: config.board.height,
            mines: config.board.mines,
        },
        broadcast: BroadcastSettings::from(&config.broadcast),
        default_session: config.presence.default_session().map(SessionId::from),
        outbound_buffer: config.broadcast.outbound_buffer,
    });

    let app = router(state).layer(cors_layer(&config.server.cors_origins));
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("扫雷会话服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号，停止服务");
}
