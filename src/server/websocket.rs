//! WebSocket 连接处理
//!
//! 每个连接一个 [`Session`]：读循环处理客户端消息和 Agent 消息，
//! 写任务把发送队列中的消息写回 WebSocket，结束时发送关闭帧。

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::AppState;
use crate::protocol::{select_subprotocol, ClientPayload};
use crate::session::Session;

/// GET /：升级为 WebSocket 并桥接到 Agent
///
/// 会话在升级完成前打开；Agent 已关闭或端点连接失败时返回 503。
pub(crate) async fn ws_handler(
    mut ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    if !state.agent.is_running() {
        tracing::warn!("Agent 已关闭，拒绝新连接");
        return (StatusCode::SERVICE_UNAVAILABLE, "agent is shut down").into_response();
    }

    let (outbound, outbound_rx) = mpsc::channel(state.config.outbound_capacity.max(1));
    let mut session = Session::for_agent(&state.agent, outbound);
    if let Err(e) = session.open() {
        tracing::error!("无法打开会话: {}", e);
        return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
    }

    // 选中的 token 原样写回响应头
    let offered = offered_subprotocols(ws.requested_protocols());
    match select_subprotocol(offered.iter().map(String::as_str)) {
        Some(protocol) => match HeaderValue::from_str(protocol) {
            Ok(value) => {
                tracing::debug!("Session {}: 选择子协议 {:?}", session.id(), protocol);
                ws.set_selected_protocol(value);
            }
            Err(e) => {
                tracing::warn!("Session {}: 子协议无法写入响应头: {}", session.id(), e);
            }
        },
        None => {
            if !offered.is_empty() {
                tracing::debug!("Session {}: 不支持的子协议 {:?}", session.id(), offered);
            }
        }
    }

    ws.on_failed_upgrade(|e| tracing::warn!("WebSocket 升级失败: {}", e))
        .on_upgrade(move |socket| run_session(socket, session, outbound_rx))
}

/// 客户端请求的全部子协议 token（跨所有 `Sec-WebSocket-Protocol` 头）
fn offered_subprotocols<'a>(values: impl Iterator<Item = &'a HeaderValue>) -> Vec<String> {
    values
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

fn to_ws_message(payload: ClientPayload) -> WsMessage {
    match payload {
        ClientPayload::Text(text) => WsMessage::Text(text.into()),
        ClientPayload::Binary(data) => WsMessage::Binary(data),
    }
}

/// 驱动一个已升级的连接直到任一端关闭
async fn run_session(
    socket: WebSocket,
    mut session: Session,
    mut outbound_rx: mpsc::Receiver<ClientPayload>,
) {
    let session_id = session.id().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::info!("Session {}: 客户端已连接", session_id);

    // 启动发送任务：队列关闭（会话关闭）后发送关闭帧
    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(to_ws_message(payload)).await {
                tracing::debug!("Session {}: 写入失败: {}", writer_id, e);
                break;
            }
        }
        // 对端可能已先关闭，此时发送失败可以忽略
        let _ = ws_tx.send(WsMessage::Close(None)).await;
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            inbound = ws_rx.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    session.on_client_message(ClientPayload::Text(text.as_str().to_owned()));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    session.on_client_message(ClientPayload::Binary(data));
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!("Session {}: 客户端关闭连接", session_id);
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!("Session {}: 读取失败: {}", session_id, e);
                    break;
                }
            },
            event = session.next_event() => match event {
                Some(event) => session.handle_event(event),
                None => {
                    tracing::info!("Session {}: Agent 端点已关闭", session_id);
                    break;
                }
            },
        }

        if session.is_closed() {
            break;
        }
    }

    // 关闭会话会释放发送队列，写任务随之结束
    session.close();
    if let Err(e) = writer.await {
        tracing::warn!("Session {}: 写任务异常退出: {}", session_id, e);
    }
}
