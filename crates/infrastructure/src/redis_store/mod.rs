//! Redis 存储后端
//!
//! 键布局：
//! - `session:{id}:connections`：会话成员连接集合（SET）
//! - `connection:{id}:session`：连接所属会话（STRING）
//! - `sessions`：会话标识 -> 会话元数据 JSON（HASH）

pub mod error;
pub mod registry;
pub mod session_store;

pub use error::{registry_read_error, registry_write_error, session_storage_error};
pub use registry::RedisConnectionRegistry;
pub use session_store::RedisSessionStore;

use domain::{ConnectionId, SessionId};

pub(crate) fn members_key(session_id: &SessionId) -> String {
    format!("session:{}:connections", session_id)
}

pub(crate) fn reverse_key(connection_id: &ConnectionId) -> String {
    format!("connection:{}:session", connection_id)
}

pub(crate) const SESSIONS_KEY: &str = "sessions";
