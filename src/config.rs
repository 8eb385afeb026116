//! 运行配置
//!
//! 默认值可通过 `SPECTATOR_*` 环境变量覆盖。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 默认控制端点（请求/应答）
pub const DEFAULT_CONTROL_ADDRESS: &str = "inproc://control";
/// 默认更新端点（广播）
pub const DEFAULT_UPDATES_ADDRESS: &str = "inproc://updates";
/// 默认监听端口
pub const DEFAULT_PORT: u16 = 9000;
/// 端点队列默认容量（高水位）
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Agent 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 控制端点地址（请求/应答）
    pub control: String,
    /// 更新端点地址（广播）
    pub updates: String,
    /// 每个端点队列的容量
    pub queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            control: DEFAULT_CONTROL_ADDRESS.to_string(),
            updates: DEFAULT_UPDATES_ADDRESS.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// 使用指定地址创建配置
    pub fn new(control: &str, updates: &str) -> Self {
        Self {
            control: control.to_string(),
            updates: updates.to_string(),
            ..Default::default()
        }
    }

    /// 从环境变量创建配置
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            control: env_or("SPECTATOR_CONTROL", defaults.control),
            updates: env_or("SPECTATOR_UPDATES", defaults.updates),
            queue_capacity: env_parse("SPECTATOR_QUEUE_CAPACITY", defaults.queue_capacity)?,
        })
    }
}

/// 前端服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 静态资源根目录
    pub static_dir: PathBuf,
    /// 每个客户端连接的发送队列容量
    pub outbound_capacity: usize,
    /// Agent 配置
    pub agent: AgentConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("./static/"),
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            agent: AgentConfig::default(),
        }
    }
}

impl ServerConfig {
    /// 从环境变量创建配置
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env_or("SPECTATOR_HOST", defaults.host),
            port: env_parse("SPECTATOR_PORT", defaults.port)?,
            static_dir: std::env::var("SPECTATOR_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            outbound_capacity: env_parse("SPECTATOR_QUEUE_CAPACITY", defaults.outbound_capacity)?,
            agent: AgentConfig::from_env()?,
        })
    }

    /// 监听的 socket 地址
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("无效的监听地址 {}:{}: {}", self.host, self.port, e)))
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}
