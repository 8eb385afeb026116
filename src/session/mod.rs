//! Session 模块 - 客户端连接与 Agent 之间的桥
//!
//! 每个客户端连接一个 [`Session`]，通过 dealer 向 Agent 发送命令，
//! 通过订阅端点接收广播，二者都回写到同一个客户端连接。

mod bridge;

pub use bridge::{Outbound, Session, SessionEvent, SessionState};
