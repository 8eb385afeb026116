//! 请求/应答端点
//!
//! 请求帧格式：`[信封帧..., 空分隔帧, 正文帧...]`。reply 端按第一个空帧切分信封，
//! 应答时把信封原样拼回，交给发出请求的那个 dealer。dealer 收到的应答
//! 第一帧即为空分隔帧。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Binding, Context};
use crate::error::{Error, Result};
use crate::protocol::{Frame, Message};

/// 对端 ID
pub type PeerId = u64;

type Inbound = (PeerId, Message);

pub(crate) struct ReplyShared {
    address: String,
    capacity: usize,
    inbound: mpsc::Sender<Inbound>,
    /// 已连接的 dealer：PeerId → 应答通道
    peers: RwLock<HashMap<PeerId, mpsc::Sender<Message>>>,
    next_peer_id: AtomicU64,
    closed: AtomicBool,
}

impl ReplyShared {
    pub(crate) fn new(address: &str, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Inbound>) {
        let capacity = capacity.max(1);
        let (inbound, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Self {
            address: address.to_string(),
            capacity,
            inbound,
            peers: RwLock::new(HashMap::new()),
            next_peer_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        (shared, rx)
    }

    pub(crate) fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    fn attach(&self) -> Option<(PeerId, mpsc::Receiver<Message>)> {
        let mut peers = self.peers.write();
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let peer = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        peers.insert(peer, tx);
        Some((peer, rx))
    }

    fn detach(&self, peer: PeerId) {
        self.peers.write().remove(&peer);
    }
}

/// 一条已拆分信封的请求
#[derive(Debug, Clone)]
pub struct Request {
    peer: PeerId,
    envelope: Vec<Frame>,
    body: Message,
}

impl Request {
    /// 发出请求的对端
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// 请求正文（不含信封）
    pub fn body(&self) -> &Message {
        &self.body
    }

    pub fn into_body(self) -> Message {
        self.body
    }
}

/// 按第一个空帧切分信封与正文
fn split_envelope(message: Message) -> Result<(Vec<Frame>, Message)> {
    let mut envelope = message.into_frames();
    let Some(delimiter) = envelope.iter().position(|frame| frame.is_empty()) else {
        return Err(Error::MalformedMessage(format!(
            "缺少空分隔帧 (共 {} 帧)",
            envelope.len()
        )));
    };
    let body = envelope.split_off(delimiter + 1);
    Ok((envelope, Message::from(body)))
}

/// 请求/应答端点（bind 端）
pub struct ReplyEndpoint {
    shared: Arc<ReplyShared>,
    inbound: mpsc::Receiver<Inbound>,
    context: Context,
}

impl ReplyEndpoint {
    pub(crate) fn new(
        shared: Arc<ReplyShared>,
        inbound: mpsc::Receiver<Inbound>,
        context: Context,
    ) -> Self {
        Self {
            shared,
            inbound,
            context,
        }
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// 接收下一条请求；端点关闭后返回 `None`
    ///
    /// 缺少空分隔帧的请求被记录并丢弃。
    pub async fn recv(&mut self) -> Option<Request> {
        loop {
            let (peer, message) = self.inbound.recv().await?;
            match split_envelope(message) {
                Ok((envelope, body)) => {
                    return Some(Request {
                        peer,
                        envelope,
                        body,
                    })
                }
                Err(e) => {
                    tracing::warn!("⚠️ 丢弃请求: peer={}, {}", peer, e);
                }
            }
        }
    }

    /// 应答指定请求（只发给发出该请求的对端）
    pub fn reply(&self, request: &Request, body: Message) -> Result<()> {
        let sender = self.shared.peers.read().get(&request.peer).cloned();
        let Some(sender) = sender else {
            return Err(Error::Send(format!("peer {} 已断开", request.peer)));
        };
        sender
            .try_send(body.prepend(&request.envelope))
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    Error::QueueFull(format!("peer {} 应答队列", request.peer))
                }
                TrySendError::Closed(_) => Error::Send(format!("peer {} 已断开", request.peer)),
            })
    }

    /// 当前连接的 dealer 数
    pub fn peer_count(&self) -> usize {
        self.shared.peer_count()
    }

    /// 关闭端点并释放地址（幂等）
    pub fn close(&mut self) {
        {
            let mut peers = self.shared.peers.write();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            // 丢弃应答通道，所有 dealer 的 recv 随之结束
            peers.clear();
        }
        self.inbound.close();
        self.context
            .release(&self.shared.address, &Binding::Reply(self.shared.clone()));
        tracing::debug!("🔌 reply 端点已关闭: {}", self.shared.address);
    }
}

impl Drop for ReplyEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

/// 请求端点（connect 端，dealer 模式）
///
/// 可连续发送多条请求，应答异步到达，不要求与请求严格交替。
pub struct DealerEndpoint {
    peer: PeerId,
    shared: Arc<ReplyShared>,
    replies: mpsc::Receiver<Message>,
    closed: bool,
}

impl DealerEndpoint {
    pub(crate) fn attach(shared: Arc<ReplyShared>) -> Option<Self> {
        let (peer, replies) = shared.attach()?;
        Some(Self {
            peer,
            shared,
            replies,
            closed: false,
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// 非阻塞发送一条请求
    pub fn send(&self, message: Message) -> Result<()> {
        if self.closed {
            return Err(Error::Send("dealer 已关闭".to_string()));
        }
        self.shared
            .inbound
            .try_send((self.peer, message))
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    Error::QueueFull(format!("{} 请求队列", self.shared.address))
                }
                TrySendError::Closed(_) => {
                    Error::Send(format!("{} 已关闭", self.shared.address))
                }
            })
    }

    /// 接收下一条应答；对端关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<Message> {
        self.replies.recv().await
    }

    /// 断开连接（幂等）
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.detach(self.peer);
        self.replies.close();
    }
}

impl Drop for DealerEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frames(message: &Message) -> Vec<&[u8]> {
        message.frames().iter().map(|f| f.as_ref()).collect()
    }

    #[test]
    fn test_split_envelope() {
        let (envelope, body) = split_envelope(Message::from(["id", "", "a", "b"])).unwrap();
        assert_eq!(envelope, vec![Bytes::from_static(b"id"), Bytes::new()]);
        assert_eq!(frames(&body), vec![&b"a"[..], b"b"]);
    }

    #[test]
    fn test_split_envelope_without_delimiter() {
        let result = split_envelope(Message::from(["hello"]));
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[tokio::test]
    async fn test_request_reply_routes_to_sender() {
        let context = Context::new();
        let mut rep = context.bind_reply("inproc://ctrl", 10).unwrap();
        let mut dealer1 = context.connect_dealer("inproc://ctrl").unwrap();
        let mut dealer2 = context.connect_dealer("inproc://ctrl").unwrap();
        assert_eq!(rep.peer_count(), 2);

        dealer2.send(Message::from(["", "from-2"])).unwrap();
        let request = rep.recv().await.unwrap();
        assert_eq!(request.peer(), dealer2.peer());
        assert_eq!(frames(request.body()), vec![&b"from-2"[..]]);

        rep.reply(&request, Message::from(["OK"])).unwrap();
        let reply = dealer2.recv().await.unwrap();
        assert_eq!(frames(&reply), vec![&b""[..], b"OK"]);

        // dealer1 没有收到任何应答
        assert!(dealer1.replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_request_dropped() {
        let context = Context::new();
        let mut rep = context.bind_reply("inproc://ctrl", 10).unwrap();
        let dealer = context.connect_dealer("inproc://ctrl").unwrap();

        dealer.send(Message::from(["no-envelope"])).unwrap();
        dealer.send(Message::from(["", "ok"])).unwrap();

        let request = rep.recv().await.unwrap();
        assert_eq!(frames(request.body()), vec![&b"ok"[..]]);
    }

    #[tokio::test]
    async fn test_reply_close_ends_dealer() {
        let context = Context::new();
        let mut rep = context.bind_reply("inproc://ctrl", 10).unwrap();
        let mut dealer = context.connect_dealer("inproc://ctrl").unwrap();

        rep.close();
        assert!(dealer.recv().await.is_none());
        assert!(matches!(
            dealer.send(Message::from(["", "late"])),
            Err(Error::Send(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_to_closed_dealer_fails() {
        let context = Context::new();
        let mut rep = context.bind_reply("inproc://ctrl", 10).unwrap();
        let mut dealer = context.connect_dealer("inproc://ctrl").unwrap();

        dealer.send(Message::from(["", "cmd"])).unwrap();
        let request = rep.recv().await.unwrap();
        dealer.close();
        assert_eq!(rep.peer_count(), 0);

        assert!(matches!(
            rep.reply(&request, Message::from(["OK"])),
            Err(Error::Send(_))
        ));
    }

    #[tokio::test]
    async fn test_dealer_queue_full() {
        let context = Context::new();
        let _rep = context.bind_reply("inproc://ctrl", 1).unwrap();
        let dealer = context.connect_dealer("inproc://ctrl").unwrap();

        dealer.send(Message::from(["", "1"])).unwrap();
        assert!(matches!(
            dealer.send(Message::from(["", "2"])),
            Err(Error::QueueFull(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_after_close_fails() {
        let context = Context::new();
        let rep = context.bind_reply("inproc://ctrl", 10).unwrap();
        let shared = rep.shared.clone();
        drop(rep);
        assert!(DealerEndpoint::attach(shared).is_none());
    }
}
