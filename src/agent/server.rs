//! Agent 服务
//!
//! 绑定控制端点与更新端点，在独立任务中循环处理命令。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::handler::Handler;
use crate::config::AgentConfig;
use crate::endpoint::{Context, PublishEndpoint, ReplyEndpoint};
use crate::error::{Error, Result};
use crate::protocol::AgentStatus;

/// 运行中的命令循环
struct CommandLoop {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Agent
///
/// 每个进程一个实例，显式创建并注入到接受连接的一侧。
/// 所有会话共享它的两个端点：控制端点汇聚命令，更新端点向全部订阅者广播。
pub struct Agent {
    config: AgentConfig,
    context: Context,
    handler: Arc<Handler>,
    started_at: DateTime<Utc>,
    running: AtomicBool,
    command_loop: Mutex<Option<CommandLoop>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// 绑定两个端点并启动命令循环
    ///
    /// 任一地址已被占用或格式错误时返回 [`Error::Bind`]，已绑定的端点会被释放。
    /// 必须在 tokio 运行时内调用。
    pub fn start(context: &Context, config: AgentConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(anyhow::anyhow!("Agent 需要在 tokio 运行时中启动: {}", e)))?;

        tracing::info!("Agent: 绑定控制端点 {:?}", config.control);
        let control = context.bind_reply(&config.control, config.queue_capacity)?;

        tracing::info!("Agent: 绑定更新端点 {:?}", config.updates);
        let updates = context.bind_publish(&config.updates, config.queue_capacity)?;

        let handler = Arc::new(Handler::new());
        let (stop, stop_rx) = oneshot::channel();
        let task = runtime.spawn(run_command_loop(control, updates, handler.clone(), stop_rx));

        tracing::info!("🚀 Agent 启动: control={}, updates={}", config.control, config.updates);

        Ok(Self {
            config,
            context: context.clone(),
            handler,
            started_at: Utc::now(),
            running: AtomicBool::new(true),
            command_loop: Mutex::new(Some(CommandLoop { stop, task })),
        })
    }

    /// 停止接受命令并关闭两个端点
    ///
    /// 等待正在处理的命令完成后才关闭端点。重复调用是空操作。
    pub async fn shutdown(&self) -> Result<()> {
        let command_loop = self.command_loop.lock().take();
        let Some(CommandLoop { stop, task }) = command_loop else {
            tracing::debug!("Agent 已关闭，忽略重复的 shutdown");
            return Ok(());
        };

        tracing::info!("Agent: 正在关闭端点...");
        self.running.store(false, Ordering::Release);

        // 循环可能已因端点关闭而退出，此时接收端已不存在
        let _ = stop.send(());
        task.await
            .map_err(|e| Error::Other(anyhow::anyhow!("命令循环异常退出: {}", e)))?;

        tracing::info!("🧹 Agent 端点已关闭");
        Ok(())
    }

    /// 是否仍在接受命令
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 控制端点地址
    pub fn control_address(&self) -> &str {
        &self.config.control
    }

    /// 更新端点地址
    pub fn updates_address(&self) -> &str {
        &self.config.updates
    }

    /// 共享的端点上下文
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// 状态快照
    pub fn status(&self) -> AgentStatus {
        let running = self.is_running();
        let connections = |address: &str| {
            if running {
                self.context.connections(address).unwrap_or(0)
            } else {
                0
            }
        };
        AgentStatus {
            agent_version: crate::VERSION_FULL.to_string(),
            started_at: self.started_at,
            running,
            commands_handled: self.handler.commands_handled(),
            subscribers: connections(&self.config.updates),
            peers: connections(&self.config.control),
        }
    }
}

/// 命令循环：直到收到停止信号（或 Agent 被 drop）
async fn run_command_loop(
    mut control: ReplyEndpoint,
    mut updates: PublishEndpoint,
    handler: Arc<Handler>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                tracing::debug!("命令循环收到停止信号");
                break;
            }
            request = control.recv() => match request {
                Some(request) => handler.handle(&control, &updates, request),
                None => break,
            },
        }
    }

    updates.close();
    control.close();
}
