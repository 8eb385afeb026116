//! spectator - Agent 程序 + WebSocket 前端
//!
//! 负责：
//! - 启动 Agent（绑定控制/更新端点）
//! - 监听端口，桥接 WebSocket 客户端并提供静态资源
//! - 收到中断信号后关闭 Agent

use std::sync::Arc;

use anyhow::{Context as _, Result};
use spectator::{server, Agent, AppState, Context, ServerConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("spectator=debug".parse()?))
        .init();

    tracing::info!("🚀 spectator v{}", spectator::VERSION_FULL);

    // 解析配置
    let config = ServerConfig::from_env()?;

    // 启动 Agent
    let context = Context::new();
    let agent = Arc::new(Agent::start(&context, config.agent.clone())?);

    let listen_addr = config.listen_addr()?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("监听 {} 失败", listen_addr))?;

    // 中断时先关闭 Agent：所有会话随之关闭，服务再停止接受连接
    let shutdown_agent = agent.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("等待中断信号失败: {}", e);
        }
        tracing::info!("收到中断信号，准备退出...");
        if let Err(e) = shutdown_agent.shutdown().await {
            tracing::error!("关闭 Agent 失败: {}", e);
        }
    };

    server::serve(listener, AppState::new(agent.clone(), config), shutdown).await?;

    agent.shutdown().await?;
    tracing::info!("👋 spectator exiting");
    Ok(())
}
