//! 优惠券与积分 HTTP 服务
//!
//! 提供券发放、PDV 核销、积分累积与运营管理 REST API，并在后台运行预占回收任务。

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use loyalty_api::{AppState, Repositories, routes};
use loyalty_engine::{Clock, MIGRATOR, SystemClock};
use loyalty_shared::{config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let (config, config_error) = AppConfig::load_or_default("loyalty-api");

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    info!("Starting loyalty-api on {}", config.server_addr());

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        MIGRATOR.run(db.pool()).await?;
        info!("Database migrations applied");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repos = Repositories::postgres(db.pool());
    let state = AppState::new(&repos, clock.clone(), &config.engine).with_database(db.clone());

    // 预占回收任务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = if config.reaper.enabled {
        let reaper = repos.reaper(clock, &config.reaper);
        Some(tokio::spawn(async move { reaper.run(shutdown_rx).await }))
    } else {
        warn!("Reservation reaper disabled by configuration");
        None
    };

    let app = routes::app(state)
        .layer(cors_layer())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_seconds),
        ))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 收到 SIGTERM 或 Ctrl+C 时停止接收新连接，等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reaper_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "回收任务退出异常");
        }
    }

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// CORS 配置：LOYALTY_CORS_ORIGINS 为逗号分隔的来源列表，`*` 表示全部
fn cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("LOYALTY_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:5173".to_string());

    if allowed_origins == "*" {
        info!("CORS allowed_origins: * (all origins)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
