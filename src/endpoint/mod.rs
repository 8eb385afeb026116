//! 进程内端点
//!
//! Agent 与各 Session 之间的消息通道，地址形如 `inproc://control`：
//! - 请求/应答：[`ReplyEndpoint`]（bind）↔ [`DealerEndpoint`]（connect）
//! - 发布/订阅：[`PublishEndpoint`]（bind）↔ [`SubscribeEndpoint`]（connect）
//!
//! 所有发送都是非阻塞的；队列满时丢弃并记录日志（best-effort）。
//! 关闭 bind 端会立即释放地址，并结束所有已连接对端的接收流。

mod pubsub;
mod reply;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

pub use pubsub::{PublishEndpoint, SubscribeEndpoint, SubscriberId};
pub use reply::{DealerEndpoint, PeerId, ReplyEndpoint, Request};

use pubsub::PublishShared;
use reply::ReplyShared;

/// 支持的地址前缀
pub const INPROC_SCHEME: &str = "inproc://";

/// 地址上绑定的端点
#[derive(Clone)]
enum Binding {
    Reply(Arc<ReplyShared>),
    Publish(Arc<PublishShared>),
}

impl Binding {
    fn is_same(&self, other: &Binding) -> bool {
        match (self, other) {
            (Binding::Reply(a), Binding::Reply(b)) => Arc::ptr_eq(a, b),
            (Binding::Publish(a), Binding::Publish(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Binding::Reply(_) => "reply",
            Binding::Publish(_) => "publish",
        }
    }
}

/// 端点上下文
///
/// 进程内地址注册表，Agent 与所有 Session 共享同一个实例。
#[derive(Clone, Default)]
pub struct Context {
    bindings: Arc<RwLock<HashMap<String, Binding>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定请求/应答端点（服务端）
    pub fn bind_reply(&self, address: &str, capacity: usize) -> Result<ReplyEndpoint> {
        check_address(address).map_err(|reason| Error::bind(address, reason))?;
        let (shared, inbound) = ReplyShared::new(address, capacity);
        self.register(address, Binding::Reply(shared.clone()))?;
        tracing::debug!("🔌 reply 端点已绑定: {}", address);
        Ok(ReplyEndpoint::new(shared, inbound, self.clone()))
    }

    /// 绑定发布端点（服务端）
    pub fn bind_publish(&self, address: &str, capacity: usize) -> Result<PublishEndpoint> {
        check_address(address).map_err(|reason| Error::bind(address, reason))?;
        let shared = PublishShared::new(address, capacity);
        self.register(address, Binding::Publish(shared.clone()))?;
        tracing::debug!("🔌 publish 端点已绑定: {}", address);
        Ok(PublishEndpoint::new(shared, self.clone()))
    }

    /// 连接到请求/应答端点（客户端，dealer 模式）
    pub fn connect_dealer(&self, address: &str) -> Result<DealerEndpoint> {
        match self.lookup(address)? {
            Binding::Reply(shared) => DealerEndpoint::attach(shared)
                .ok_or_else(|| Error::connect(address, "端点正在关闭")),
            other => Err(Error::connect(
                address,
                format!("类型不匹配: 期望 reply, 实际 {}", other.kind()),
            )),
        }
    }

    /// 连接到发布端点（客户端，只订阅）
    pub fn connect_subscriber(&self, address: &str) -> Result<SubscribeEndpoint> {
        match self.lookup(address)? {
            Binding::Publish(shared) => SubscribeEndpoint::attach(shared)
                .ok_or_else(|| Error::connect(address, "端点正在关闭")),
            other => Err(Error::connect(
                address,
                format!("类型不匹配: 期望 publish, 实际 {}", other.kind()),
            )),
        }
    }

    /// 地址是否已被绑定
    pub fn is_bound(&self, address: &str) -> bool {
        self.bindings.read().contains_key(address)
    }

    /// 地址上当前连接的对端数（未绑定时为 `None`）
    pub fn connections(&self, address: &str) -> Option<usize> {
        let binding = self.bindings.read().get(address).cloned()?;
        Some(match binding {
            Binding::Reply(shared) => shared.peer_count(),
            Binding::Publish(shared) => shared.subscriber_count(),
        })
    }

    fn register(&self, address: &str, binding: Binding) -> Result<()> {
        let mut bindings = self.bindings.write();
        if let Some(existing) = bindings.get(address) {
            return Err(Error::bind(
                address,
                format!("地址已被占用 ({})", existing.kind()),
            ));
        }
        bindings.insert(address.to_string(), binding);
        Ok(())
    }

    /// 释放地址；只移除调用者自己的绑定
    fn release(&self, address: &str, binding: &Binding) {
        let mut bindings = self.bindings.write();
        if bindings
            .get(address)
            .is_some_and(|existing| existing.is_same(binding))
        {
            bindings.remove(address);
            tracing::debug!("🔌 地址已释放: {}", address);
        }
    }

    fn lookup(&self, address: &str) -> Result<Binding> {
        check_address(address).map_err(|reason| Error::connect(address, reason))?;
        self.bindings
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::connect(address, "地址未绑定"))
    }
}

/// 校验地址格式：`inproc://<name>`
fn check_address(address: &str) -> std::result::Result<(), String> {
    let name = address
        .strip_prefix(INPROC_SCHEME)
        .ok_or_else(|| format!("不支持的地址，需以 {} 开头", INPROC_SCHEME))?;
    if name.is_empty() {
        return Err("地址名称为空".to_string());
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/')))
    {
        return Err(format!("地址包含非法字符 {:?}", c));
    }
    Ok(())
}
