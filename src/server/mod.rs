//! # HTTP 服务
//!
//! axum 路由、访问日志与 CORS 中间件、优雅关闭。

pub mod relay;
pub mod state;
pub mod task;

pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ConfigManager;
use crate::error::{RelayError, Result};
use crate::notification::Mailer;

/// 存活检查
async fn health() -> axum::Json<Value> {
    axum::Json(json!({ "status": "ok" }))
}

/// 构建路由
pub fn build_router(state: AppState, cors_enabled: bool) -> Router {
    let app = Router::new()
        .route("/v1/chat/completions", post(relay::relay_openai))
        .route("/v1/completions", post(relay::relay_openai))
        .route("/v1/embeddings", post(relay::relay_openai))
        .route("/v1/images/generations", post(relay::relay_openai))
        .route("/v1/rerank", post(relay::relay_openai))
        .route("/v1/audio/speech", post(relay::relay_openai))
        .route("/v1/responses", post(relay::relay_openai))
        .route("/v1/messages", post(relay::relay_claude))
        .route("/suno/submit/{action}", post(task::submit))
        .route("/suno/fetch", post(task::fetch))
        .route("/v1/models", get(relay::list_models))
        .route("/health", get(health))
        .with_state(state);

    let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());
    if cors_enabled {
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(service_builder.layer(cors_layer))
    } else {
        app.layer(service_builder)
    }
}

/// 绑定配置中的地址并运行到收到关闭信号
pub async fn serve(config: Arc<ConfigManager>, mailer: Arc<dyn Mailer>) -> Result<()> {
    let current = config.current();
    let addr = format!("{}:{}", current.server.host, current.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::server_init_with_source(format!("绑定监听地址失败: {addr}"), e))?;

    let state = AppState::new(config, mailer);
    let app = build_router(state, current.server.cors_enabled);

    info!(
        component = "relay.server",
        addr = %addr,
        channels = current.channels.len(),
        "转发服务已启动"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RelayError::server_init_with_source("HTTP 服务异常退出", e))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(component = "relay.server", error = %e, "无法监听 Ctrl+C");
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
                tracing::warn!(component = "relay.server", error = %e, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(component = "relay.server", "收到关闭信号，等待在途请求结束");
}
