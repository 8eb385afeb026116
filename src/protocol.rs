//! 消息协议定义
//!
//! 端点之间传递多帧消息（[`Message`]），帧边界与顺序端到端保持不变。
//! 客户端连接上每条消息对应一个不透明帧（[`ClientPayload`]）。

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个消息帧
pub type Frame = Bytes;

/// Agent 对每条命令的应答
pub const ACK: &[u8] = b"OK";

/// 会话接受的 WebSocket 子协议（大小写不敏感）
pub const SUBPROTOCOL: &str = "spectator";

/// 多帧消息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Frame>,
}

impl Message {
    /// 创建空消息
    pub fn new() -> Self {
        Self::default()
    }

    /// 单帧消息
    pub fn single(frame: impl Into<Frame>) -> Self {
        Self {
            frames: vec![frame.into()],
        }
    }

    /// 追加一帧
    pub fn push(&mut self, frame: impl Into<Frame>) {
        self.frames.push(frame.into());
    }

    /// 追加一帧（链式）
    pub fn with(mut self, frame: impl Into<Frame>) -> Self {
        self.push(frame);
        self
    }

    /// 所有帧
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// 第一帧
    pub fn first(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// 帧数
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// 在消息前拼接信封帧
    pub fn prepend(self, envelope: &[Frame]) -> Self {
        let mut frames = Vec::with_capacity(envelope.len() + self.frames.len());
        frames.extend_from_slice(envelope);
        frames.extend(self.frames);
        Self { frames }
    }
}

impl From<Vec<Frame>> for Message {
    fn from(frames: Vec<Frame>) -> Self {
        Self { frames }
    }
}

impl<const N: usize> From<[&'static str; N]> for Message {
    fn from(parts: [&'static str; N]) -> Self {
        Self {
            frames: parts
                .into_iter()
                .map(|part| Bytes::from_static(part.as_bytes()))
                .collect(),
        }
    }
}

impl IntoIterator for Message {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// 客户端连接上的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPayload {
    /// 文本消息
    Text(String),
    /// 二进制消息
    Binary(Bytes),
}

impl ClientPayload {
    /// 转换为端点要求的字节编码（文本按 UTF-8）
    pub fn into_frame(self) -> Frame {
        match self {
            ClientPayload::Text(text) => Bytes::from(text),
            ClientPayload::Binary(data) => data,
        }
    }

    /// 将端点帧转换为客户端消息：合法 UTF-8 作为文本发送，其余作为二进制
    pub fn from_frame(frame: Frame) -> Self {
        match std::str::from_utf8(&frame) {
            Ok(text) => ClientPayload::Text(text.to_string()),
            Err(_) => ClientPayload::Binary(frame),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ClientPayload::Text(text) => text.len(),
            ClientPayload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 子协议协商
///
/// 按客户端给出的顺序查找第一个与 [`SUBPROTOCOL`] 大小写不敏感匹配的 token，
/// 返回客户端自己的写法。没有匹配时返回 `None`。
pub fn select_subprotocol<'a, I>(offered: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    offered
        .into_iter()
        .map(str::trim)
        .find(|protocol| protocol.eq_ignore_ascii_case(SUBPROTOCOL))
}

/// Agent 状态快照（`GET /status`）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// 完整版本号
    pub agent_version: String,
    /// 启动时间
    pub started_at: DateTime<Utc>,
    /// 是否仍在接受命令
    pub running: bool,
    /// 已处理的命令数
    pub commands_handled: u64,
    /// 当前订阅者数
    pub subscribers: usize,
    /// 当前连接到控制端点的会话数
    pub peers: usize,
}
