//! 前端服务
//!
//! - `GET /`：WebSocket，桥接到 Agent
//! - `GET /assets/*`：静态资源
//! - `GET /status`：Agent 状态

mod websocket;

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::serve::ListenerExt;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::AgentStatus;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    /// 进程唯一的 Agent
    pub agent: Arc<Agent>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(agent: Arc<Agent>, config: ServerConfig) -> Self {
        Self {
            agent,
            config: Arc::new(config),
        }
    }
}

/// 构建路由
pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(websocket::ws_handler))
        .route("/status", get(status_handler))
        .nest_service("/assets", assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 在 `listener` 上提供服务，直到 `shutdown` 完成
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    let listener = listener.tap_io(|tcp| {
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::warn!("设置 TCP_NODELAY 失败: {}", e);
        }
    });

    tracing::info!("🌐 监听 http://{}", local_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("🌐 服务已停止");
    Ok(())
}

/// GET /status
async fn status_handler(State(state): State<AppState>) -> Json<AgentStatus> {
    Json(state.agent.status())
}
