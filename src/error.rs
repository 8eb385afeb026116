//! 错误类型定义

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 端点绑定失败（地址已被占用或格式错误），Agent 启动时致命
    #[error("绑定失败 {address}: {reason}")]
    Bind { address: String, reason: String },

    /// 端点连接失败（地址未绑定、类型不匹配或格式错误）
    #[error("连接失败 {address}: {reason}")]
    Connect { address: String, reason: String },

    /// 发送失败（对端已关闭），只影响所在 Session
    #[error("发送失败: {0}")]
    Send(String),

    /// 队列已满（对端仍在，只是暂时处理不过来），消息被丢弃
    #[error("队列已满: {0}")]
    QueueFull(String),

    /// 消息帧数不足（例如缺少路由帧）
    #[error("消息格式错误: {0}")]
    MalformedMessage(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn bind(address: &str, reason: impl Into<String>) -> Self {
        Self::Bind {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn connect(address: &str, reason: impl Into<String>) -> Self {
        Self::Connect {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
