//! Agent 模块 - 命令汇聚 + 更新广播
//!
//! Agent 是整个进程唯一的命令入口，负责：
//! - 绑定控制端点（请求/应答）与更新端点（发布）
//! - 对每条命令应答 `OK`
//! - 将命令原样广播给所有当前订阅者

mod handler;
mod server;

pub use server::Agent;
