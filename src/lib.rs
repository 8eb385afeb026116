//! spectator - 带 WebSocket 前端的 Agent 程序
//!
//! 一个常驻 Agent 进程，持有一对命令/更新端点；任意多个前端客户端通过
//! WebSocket 连接，向 Agent 发送命令并实时接收更新。
//!
//! # 核心功能
//!
//! - **Agent**: 命令汇聚（应答 `OK`）+ 更新广播
//! - **Session**: 每个客户端连接一个协议桥，把请求/应答通道和广播通道复用到同一个连接上
//! - **端点**: 进程内的请求/应答与发布/订阅通道，多帧消息保持帧边界
//! - **前端服务**: WebSocket 桥接、静态资源、状态查询
//!
//! # 架构
//!
//! ```text
//! Client → Session → 控制端点 → Agent ─┬→ 应答 → 发出命令的 Session → Client
//!                                      └→ 更新端点 → 所有 Session → 各自的 Client
//! ```

pub mod agent;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;

// Re-exports
pub use agent::Agent;
pub use config::{AgentConfig, ServerConfig};
pub use endpoint::Context;
pub use error::{Error, Result};
pub use protocol::{AgentStatus, ClientPayload, Frame, Message};
pub use server::AppState;
pub use session::{Session, SessionEvent, SessionState};

/// 编译时间戳（由 build.rs 写入）
///
/// 格式：Unix 时间戳（秒）
pub const BUILD_TIMESTAMP: u64 = {
    // const 中不能直接用 parse()，需要手动解析
    const BYTES: &[u8] = env!("BUILD_TIMESTAMP").as_bytes();
    const fn parse_u64(bytes: &[u8]) -> u64 {
        let mut result = 0u64;
        let mut i = 0;
        while i < bytes.len() {
            result = result * 10 + (bytes[i] - b'0') as u64;
            i += 1;
        }
        result
    }
    parse_u64(BYTES)
};

/// 完整版本号（语义版本 + 编译时间戳）
///
/// 格式：`{CARGO_PKG_VERSION}-{BUILD_TIMESTAMP}`
/// 例如：`0.1.0-1706400000`
pub const VERSION_FULL: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"));
