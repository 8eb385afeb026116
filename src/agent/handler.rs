//! 命令处理器
//!
//! 对每条命令：先通过 reply 端点应答 `OK`，再把原始消息发布到更新端点。

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::endpoint::{PublishEndpoint, ReplyEndpoint, Request};
use crate::protocol::{Message, ACK};

/// 命令处理器
#[derive(Default)]
pub(crate) struct Handler {
    commands_handled: AtomicU64,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一条命令
    pub fn handle(&self, control: &ReplyEndpoint, updates: &PublishEndpoint, request: Request) {
        tracing::debug!(
            "📥 命令: peer={}, frames={}",
            request.peer(),
            request.body().len()
        );

        // 应答只发给发出命令的会话
        if let Err(e) = control.reply(&request, Message::single(Bytes::from_static(ACK))) {
            tracing::warn!("应答失败: peer={}, {}", request.peer(), e);
        }

        let delivered = updates.publish(request.body());
        tracing::trace!("📡 命令已广播: peer={}, subscribers={}", request.peer(), delivered);

        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }

    /// 已处理的命令数
    pub fn commands_handled(&self) -> u64 {
        self.commands_handled.load(Ordering::Relaxed)
    }
}
