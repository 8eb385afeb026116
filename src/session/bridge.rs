//! 单个客户端连接的协议桥
//!
//! 状态：`Created → Open → Closed`，每个入口都先检查状态。
//! - 客户端 → Agent：`["", payload]` 经 dealer 发往控制端点
//! - Agent 应答 → 客户端：去掉第一帧（路由帧），其余每帧一条消息
//! - Agent 广播 → 客户端：每帧一条消息，不做剥离

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::agent::Agent;
use crate::endpoint::{Context, DealerEndpoint, SubscribeEndpoint};
use crate::error::{Error, Result};
use crate::protocol::{ClientPayload, Frame, Message};

/// 发往客户端连接的队列
pub type Outbound = mpsc::Sender<ClientPayload>;

/// 会话状态（对外只读视图）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Open,
    Closed,
}

enum State {
    Created {
        outbound: Outbound,
    },
    Open {
        control: DealerEndpoint,
        updates: SubscribeEndpoint,
        outbound: Outbound,
    },
    Closed,
}

/// 来自 Agent 的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 控制端点的应答（含路由帧）
    Reply(Message),
    /// 更新端点的广播
    Update(Message),
}

/// 会话：每个客户端连接一个实例
///
/// 独占一个 dealer 和一个订阅端点，生命周期与客户端连接一致。
pub struct Session {
    id: String,
    context: Context,
    control_address: String,
    updates_address: String,
    state: State,
}

impl Session {
    /// 创建会话（尚未连接任何端点）
    pub fn new(context: Context, control: &str, updates: &str, outbound: Outbound) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context,
            control_address: control.to_string(),
            updates_address: updates.to_string(),
            state: State::Created { outbound },
        }
    }

    /// 连接到指定 Agent 的会话
    pub fn for_agent(agent: &Agent, outbound: Outbound) -> Self {
        Self::new(
            agent.context().clone(),
            agent.control_address(),
            agent.updates_address(),
            outbound,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Created { .. } => SessionState::Created,
            State::Open { .. } => SessionState::Open,
            State::Closed => SessionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// 连接 dealer 与订阅端点，订阅全部 topic
    ///
    /// 任一连接失败时会话直接进入 `Closed`，不注册任何回调。
    pub fn open(&mut self) -> Result<()> {
        let outbound = match std::mem::replace(&mut self.state, State::Closed) {
            State::Created { outbound } => outbound,
            State::Open {
                control,
                updates,
                outbound,
            } => {
                tracing::debug!("Session {}: 已经打开", self.id);
                self.state = State::Open {
                    control,
                    updates,
                    outbound,
                };
                return Ok(());
            }
            State::Closed => {
                return Err(Error::connect(&self.control_address, "会话已关闭"));
            }
        };

        tracing::debug!("Session {}: 连接 DEALER 到 {:?}", self.id, self.control_address);
        let control = match self.context.connect_dealer(&self.control_address) {
            Ok(control) => control,
            Err(e) => {
                tracing::error!("Session {}: 打开失败: {}", self.id, e);
                return Err(e);
            }
        };

        tracing::debug!("Session {}: 连接 SUB 到 {:?}", self.id, self.updates_address);
        let updates = match self.context.connect_subscriber(&self.updates_address) {
            Ok(updates) => updates,
            Err(e) => {
                // control 在此处 drop，随即断开
                tracing::error!("Session {}: 打开失败: {}", self.id, e);
                return Err(e);
            }
        };
        updates.subscribe(Bytes::new());

        self.state = State::Open {
            control,
            updates,
            outbound,
        };
        tracing::info!("Session {}: 已连接，等待消息", self.id);
        Ok(())
    }

    /// 等待下一条应答或广播
    ///
    /// 会话未打开，或 Agent 的任一端点已关闭时返回 `None`。
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let State::Open {
            control, updates, ..
        } = &mut self.state
        else {
            return None;
        };

        tokio::select! {
            reply = control.recv() => reply.map(SessionEvent::Reply),
            update = updates.recv() => update.map(SessionEvent::Update),
        }
    }

    /// 分发一条来自 Agent 的消息
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Reply(message) => self.on_reply(message),
            SessionEvent::Update(message) => self.on_update(message),
        }
    }

    /// 客户端 → Agent
    pub fn on_client_message(&mut self, payload: ClientPayload) {
        let State::Open { control, .. } = &self.state else {
            tracing::debug!("Session {}: 未打开，忽略客户端消息", self.id);
            return;
        };

        tracing::debug!("Session {}: 收到客户端消息 ({} 字节)", self.id, payload.len());
        let request = Message::single(Bytes::new()).with(payload.into_frame());
        match control.send(request) {
            Ok(()) => {}
            // 控制端点积压：丢弃本条命令，会话继续
            Err(e @ Error::QueueFull(_)) => {
                tracing::warn!("Session {}: 丢弃命令: {}", self.id, e);
            }
            Err(e) => {
                tracing::error!("Session {}: 转发命令失败: {}", self.id, e);
                self.close();
            }
        }
    }

    /// Agent 应答 → 客户端（去掉路由帧）
    pub fn on_reply(&mut self, message: Message) {
        if !self.is_open() {
            return;
        }
        if message.is_empty() {
            let e = Error::MalformedMessage("应答缺少路由帧".to_string());
            tracing::warn!("Session {}: 丢弃应答: {}", self.id, e);
            return;
        }
        self.forward(message.into_iter().skip(1));
    }

    /// Agent 广播 → 客户端
    pub fn on_update(&mut self, message: Message) {
        if !self.is_open() {
            return;
        }
        tracing::trace!("Session {}: 收到广播 ({} 帧)", self.id, message.len());
        self.forward(message.into_iter());
    }

    /// 每帧作为一条独立消息按顺序发给客户端
    fn forward(&mut self, frames: impl Iterator<Item = Frame>) {
        let State::Open { outbound, .. } = &self.state else {
            return;
        };

        let mut failed = None;
        for frame in frames {
            match outbound.try_send(ClientPayload::from_frame(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Session {}: 客户端发送队列已满，丢弃消息", self.id);
                }
                Err(TrySendError::Closed(_)) => {
                    failed = Some(Error::Send("客户端连接已关闭".to_string()));
                    break;
                }
            }
        }

        if let Some(e) = failed {
            tracing::error!("Session {}: {}", self.id, e);
            self.close();
        }
    }

    /// 关闭两个端点，停止转发（幂等）
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open {
                mut control,
                mut updates,
                outbound,
            } => {
                control.close();
                updates.close();
                drop(outbound);
                tracing::info!("Session {}: 连接断开，端点已关闭", self.id);
            }
            State::Created { .. } => {
                tracing::debug!("Session {}: 未打开即关闭", self.id);
            }
            State::Closed => {}
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{PublishEndpoint, ReplyEndpoint};

    const CONTROL: &str = "inproc://control";
    const UPDATES: &str = "inproc://updates";

    /// 手动绑定的 Agent 端点，便于检查帧
    fn fake_agent(context: &Context) -> (ReplyEndpoint, PublishEndpoint) {
        (
            context.bind_reply(CONTROL, 10).unwrap(),
            context.bind_publish(UPDATES, 10).unwrap(),
        )
    }

    fn open_session(context: &Context, capacity: usize) -> (Session, mpsc::Receiver<ClientPayload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mut session = Session::new(context.clone(), CONTROL, UPDATES, tx);
        session.open().unwrap();
        (session, rx)
    }

    fn text(s: &str) -> ClientPayload {
        ClientPayload::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_open_connects_and_subscribes() {
        let context = Context::new();
        let (_rep, publisher) = fake_agent(&context);
        let (session, _rx) = open_session(&context, 10);

        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(context.connections(CONTROL), Some(1));
        assert_eq!(publisher.subscriber_count(), 1);

        // 订阅全部 topic
        assert_eq!(publisher.publish(&Message::from(["anything"])), 1);
    }

    #[test]
    fn test_open_fails_without_agent() {
        let context = Context::new();
        let (tx, _rx) = mpsc::channel(10);
        let mut session = Session::new(context, CONTROL, UPDATES, tx);
        assert_eq!(session.state(), SessionState::Created);

        assert!(matches!(session.open(), Err(Error::Connect { .. })));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_open_fails_partway() {
        let context = Context::new();
        let _rep = context.bind_reply(CONTROL, 10).unwrap();
        let (tx, _rx) = mpsc::channel(10);
        let mut session = Session::new(context.clone(), CONTROL, UPDATES, tx);

        assert!(session.open().is_err());
        assert!(session.is_closed());
        // 已连接的 dealer 被释放
        assert_eq!(context.connections(CONTROL), Some(0));

        session.close();
        assert!(session.open().is_err());
    }

    #[tokio::test]
    async fn test_text_message_framed_with_envelope() {
        let context = Context::new();
        let (mut rep, _publisher) = fake_agent(&context);
        let (mut session, _rx) = open_session(&context, 10);

        session.on_client_message(text("héllo"));

        // reply 端只接受带空分隔帧的请求
        let request = rep.recv().await.unwrap();
        assert_eq!(request.body(), &Message::single(Bytes::from("héllo")));

        rep.reply(&request, Message::from(["OK"])).unwrap();
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Reply(Message::from(["", "OK"])))
        );
    }

    #[tokio::test]
    async fn test_binary_message_unchanged() {
        let context = Context::new();
        let (mut rep, _publisher) = fake_agent(&context);
        let (mut session, _rx) = open_session(&context, 10);

        let data = Bytes::from_static(&[0x00, 0xff, 0x7f]);
        session.on_client_message(ClientPayload::Binary(data.clone()));

        let request = rep.recv().await.unwrap();
        assert_eq!(request.body(), &Message::single(data));
    }

    #[tokio::test]
    async fn test_reply_strips_routing_frame() {
        let context = Context::new();
        let (_rep, _publisher) = fake_agent(&context);
        let (mut session, mut rx) = open_session(&context, 10);

        session.on_reply(Message::from(["", "a", "b", "c"]));

        assert_eq!(rx.recv().await, Some(text("a")));
        assert_eq!(rx.recv().await, Some(text("b")));
        assert_eq!(rx.recv().await, Some(text("c")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_forwards_all_frames() {
        let context = Context::new();
        let (_rep, _publisher) = fake_agent(&context);
        let (mut session, mut rx) = open_session(&context, 10);

        let binary = Bytes::from_static(&[0xc3, 0x28]);
        session.on_update(Message::from(vec![Bytes::new(), Bytes::from("x"), binary.clone()]));

        assert_eq!(rx.recv().await, Some(text("")));
        assert_eq!(rx.recv().await, Some(text("x")));
        assert_eq!(rx.recv().await, Some(ClientPayload::Binary(binary)));
    }

    #[tokio::test]
    async fn test_empty_reply_dropped() {
        let context = Context::new();
        let (_rep, _publisher) = fake_agent(&context);
        let (mut session, mut rx) = open_session(&context, 10);

        session.on_reply(Message::new());
        assert!(rx.try_recv().is_err());
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_send_to_closed_client_closes_session() {
        let context = Context::new();
        let (_rep, publisher) = fake_agent(&context);
        let (mut session, rx) = open_session(&context, 10);
        drop(rx);

        session.on_update(Message::from(["x"]));
        assert!(session.is_closed());
        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(context.connections(CONTROL), Some(0));
    }

    #[tokio::test]
    async fn test_full_outbound_drops_frame() {
        let context = Context::new();
        let (_rep, _publisher) = fake_agent(&context);
        let (mut session, mut rx) = open_session(&context, 1);

        session.on_update(Message::from(["a", "b"]));
        assert!(session.is_open());
        assert_eq!(rx.recv().await, Some(text("a")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_busy_control_queue_keeps_other_sessions_open() {
        let context = Context::new();
        let mut rep = context.bind_reply(CONTROL, 2).unwrap();
        let _publisher = context.bind_publish(UPDATES, 2).unwrap();
        let (mut a, _rx_a) = open_session(&context, 10);
        let (mut b, _rx_b) = open_session(&context, 10);

        // A 占满共享的请求队列
        a.on_client_message(text("1"));
        a.on_client_message(text("2"));

        // B 的命令被丢弃，但会话保持打开
        b.on_client_message(text("b"));
        assert!(b.is_open());
        assert!(a.is_open());
        assert_eq!(context.connections(CONTROL), Some(2));

        // 队列腾出空间后 B 的命令照常送达
        assert_eq!(rep.recv().await.unwrap().body(), &Message::from(["1"]));
        assert_eq!(rep.recv().await.unwrap().body(), &Message::from(["2"]));
        b.on_client_message(text("b2"));
        assert_eq!(rep.recv().await.unwrap().body(), &Message::from(["b2"]));
    }

    #[tokio::test]
    async fn test_client_message_to_closed_agent_closes_session() {
        let context = Context::new();
        let (mut rep, _publisher) = fake_agent(&context);
        let (mut session, _rx) = open_session(&context, 10);

        rep.close();
        session.on_client_message(text("late"));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_forwarding() {
        let context = Context::new();
        let (_rep, publisher) = fake_agent(&context);
        let (mut session, mut rx) = open_session(&context, 10);

        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(publisher.subscriber_count(), 0);

        session.on_update(Message::from(["late"]));
        session.on_client_message(text("late"));
        // 发送端已随会话关闭
        assert_eq!(rx.recv().await, None);
        assert_eq!(session.next_event().await, None);
    }

    #[test]
    fn test_client_message_before_open_ignored() {
        let context = Context::new();
        let (_rep, _publisher) = fake_agent(&context);
        let (tx, _rx) = mpsc::channel(10);
        let mut session = Session::new(context, CONTROL, UPDATES, tx);

        session.on_client_message(text("too early"));
        assert_eq!(session.state(), SessionState::Created);
    }

    #[tokio::test]
    async fn test_next_event_ends_when_agent_closes() {
        let context = Context::new();
        let (rep, mut publisher) = fake_agent(&context);
        let (mut session, _rx) = open_session(&context, 10);

        publisher.close();
        assert_eq!(session.next_event().await, None);
        drop(rep);
    }

    #[tokio::test]
    async fn test_send_after_agent_closed_closes_session() {
        let context = Context::new();
        let (mut rep, _publisher) = fake_agent(&context);
        let (mut session, _rx) = open_session(&context, 10);

        rep.close();
        session.on_client_message(text("nobody home"));
        assert!(session.is_closed());
    }
}
