//! 通知服务入口
//!
//! 启动通知引擎（投递、定时调度、批量处理）与 WebSocket 网关。
//! 指标与健康检查由 observability 模块在 metrics_port 上单独提供。

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use notification_service::{Adapters, NotificationEngine, Stores, realtime};
use notify_shared::{
    config::{AppConfig, AuthConfig},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const SERVICE_NAME: &str = "notification-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 加载配置：config/default.toml -> config/{env}.toml -> config/{service}.toml -> 环境变量
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("加载配置失败，使用默认配置: {e}");
        AppConfig::default()
    });

    // 2. 可观测性
    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        addr = %config.server_addr(),
        "Starting notification-service..."
    );

    if config.notification.auth.jwt_secret == AuthConfig::default().jwt_secret {
        if config.is_production() {
            anyhow::bail!("生产环境必须配置 NOTIFY_NOTIFICATION__AUTH__JWT_SECRET");
        }
        warn!("使用默认 JWT 密钥，生产环境请通过 NOTIFY_NOTIFICATION__AUTH__JWT_SECRET 覆盖");
    }

    // 3. 数据库
    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations("migrations").await?;
    }
    info!("Database connection established");

    // 4. 引擎
    let engine = Arc::new(NotificationEngine::build(
        &config.notification,
        Stores::postgres(db.pool().clone()),
        Adapters::from_config(&config.notification, db.pool().clone()),
    ));
    engine.start().await;

    // 5. HTTP：WebSocket 网关 + 健康检查
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(db.clone())
        .merge(realtime::ws::router(engine.gateway.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 健康检查，数据库不可用时返回 503
async fn health_check(State(db): State<Database>) -> (StatusCode, Json<serde_json::Value>) {
    match db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "service": SERVICE_NAME
            })),
        ),
        Err(e) => {
            warn!(error = %e, "数据库健康检查失败");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "degraded",
                    "service": SERVICE_NAME,
                    "database": e.code()
                })),
            )
        }
    }
}
