//! 发布/订阅端点
//!
//! 维护订阅列表，将消息推送给订阅者。按第一帧做前缀匹配，空 topic 匹配所有消息。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Binding, Context};
use crate::protocol::{Frame, Message};

/// 订阅者 ID
pub type SubscriberId = u64;

struct Subscriber {
    /// 订阅的 topic 前缀
    topics: Vec<Frame>,
    sender: mpsc::Sender<Message>,
}

impl Subscriber {
    fn matches(&self, message: &Message) -> bool {
        let first = message.first().map(|f| f.as_ref()).unwrap_or_default();
        self.topics.iter().any(|topic| first.starts_with(topic))
    }
}

pub(crate) struct PublishShared {
    address: String,
    capacity: usize,
    /// SubscriberId → 订阅者
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    /// 下一个订阅者 ID
    next_id: RwLock<SubscriberId>,
    closed: AtomicBool,
}

impl PublishShared {
    pub(crate) fn new(address: &str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            capacity: capacity.max(1),
            subscribers: RwLock::new(HashMap::new()),
            next_id: RwLock::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// 注册新订阅者（尚未订阅任何 topic）
    fn register(&self) -> Option<(SubscriberId, mpsc::Receiver<Message>)> {
        let mut subscribers = self.subscribers.write();
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let mut next_id = self.next_id.write();
        let id = *next_id;
        *next_id += 1;

        let (sender, rx) = mpsc::channel(self.capacity);
        subscribers.insert(
            id,
            Subscriber {
                topics: Vec::new(),
                sender,
            },
        );

        tracing::debug!("📡 Subscriber registered: {} id={}", self.address, id);
        Some((id, rx))
    }

    fn unregister(&self, id: SubscriberId) {
        if self.subscribers.write().remove(&id).is_some() {
            tracing::debug!("📡 Subscriber unregistered: {} id={}", self.address, id);
        }
    }

    fn subscribe(&self, id: SubscriberId, topic: Frame) {
        if let Some(subscriber) = self.subscribers.write().get_mut(&id) {
            subscriber.topics.push(topic);
        }
    }

    fn unsubscribe(&self, id: SubscriberId, topic: &[u8]) {
        if let Some(subscriber) = self.subscribers.write().get_mut(&id) {
            if let Some(pos) = subscriber.topics.iter().position(|t| t.as_ref() == topic) {
                subscriber.topics.remove(pos);
            }
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// 广播给所有匹配的订阅者（非阻塞，fire-and-forget），返回送达数
    fn publish(&self, message: &Message) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<Message>)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, subscriber)| subscriber.matches(message))
                .map(|(id, subscriber)| (*id, subscriber.sender.clone()))
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!("📡 No subscribers: {}", self.address);
            return 0;
        }

        tracing::debug!(
            "📡 Publishing: {} frames={}, subscribers={}",
            self.address,
            message.len(),
            targets.len()
        );

        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("📡 Queue full, dropping message: subscriber={}", id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("📡 Subscriber closed: subscriber={}", id);
                }
            }
        }
        delivered
    }
}

/// 发布端点（bind 端）
pub struct PublishEndpoint {
    shared: Arc<PublishShared>,
    context: Context,
}

impl PublishEndpoint {
    pub(crate) fn new(shared: Arc<PublishShared>, context: Context) -> Self {
        Self { shared, context }
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// 发布消息给当前所有匹配的订阅者，返回送达数
    ///
    /// 没有订阅者时消息直接丢弃，不做缓存。
    pub fn publish(&self, message: &Message) -> usize {
        if self.shared.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.shared.publish(message)
    }

    /// 当前订阅者数
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriber_count()
    }

    /// 关闭端点并释放地址（幂等）
    pub fn close(&mut self) {
        {
            let mut subscribers = self.shared.subscribers.write();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            // 丢弃发送通道，所有订阅者的 recv 随之结束
            subscribers.clear();
        }
        self.context
            .release(&self.shared.address, &Binding::Publish(self.shared.clone()));
        tracing::debug!("🔌 publish 端点已关闭: {}", self.shared.address);
    }
}

impl Drop for PublishEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

/// 订阅端点（connect 端）
///
/// 连接后不订阅任何 topic 时收不到消息。
pub struct SubscribeEndpoint {
    id: SubscriberId,
    shared: Arc<PublishShared>,
    rx: mpsc::Receiver<Message>,
    closed: bool,
}

impl SubscribeEndpoint {
    pub(crate) fn attach(shared: Arc<PublishShared>) -> Option<Self> {
        let (id, rx) = shared.register()?;
        Some(Self {
            id,
            shared,
            rx,
            closed: false,
        })
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// 订阅 topic 前缀，空 topic 表示订阅全部；返回后立即生效
    pub fn subscribe(&self, topic: impl Into<Frame>) {
        self.shared.subscribe(self.id, topic.into());
    }

    /// 取消一次订阅
    pub fn unsubscribe(&self, topic: &[u8]) {
        self.shared.unsubscribe(self.id, topic);
    }

    /// 接收下一条消息；发布端关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// 断开连接（幂等）
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.unregister(self.id);
        self.rx.close();
    }
}

impl Drop for SubscribeEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
