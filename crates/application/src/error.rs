use domain::{ConnectionId, DomainError, SessionId};
use thiserror::Error;

/// 连接注册表错误
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 读操作重试后仍失败
    #[error("registry unavailable: {message}")]
    Unavailable { message: String },
    /// 写操作失败，交由调用方决定是否整体重试
    #[error("registry write failed: {message}")]
    Write { message: String },
    /// 连接仍映射在另一个会话中，旧映射已过期
    #[error("connection {connection_id} is still registered in session {existing}, cannot join {requested}")]
    StaleMembership {
        connection_id: ConnectionId,
        existing: SessionId,
        requested: SessionId,
    },
}

impl RegistryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }
}

/// 在线状态协议错误
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("connection registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("connection registry write failed: {0}")]
    Registry(String),
    #[error("connection {connection_id} is already registered in session {existing}")]
    StaleConnection {
        connection_id: ConnectionId,
        existing: SessionId,
    },
    #[error("connection {connection_id} did not name a session and no default session is configured")]
    MissingSession { connection_id: ConnectionId },
    #[error("action from connection {connection_id} has no known session")]
    OrphanAction { connection_id: ConnectionId },
    #[error("malformed message from connection {connection_id}: {reason}")]
    MalformedMessage {
        connection_id: ConnectionId,
        reason: String,
    },
    #[error("failed to serialize outbound message: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PresenceError {
    /// 非致命错误只丢弃当前消息，连接继续保持
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PresenceError::OrphanAction { .. } | PresenceError::MalformedMessage { .. }
        )
    }
}

impl From<RegistryError> for PresenceError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Unavailable { message } => PresenceError::RegistryUnavailable(message),
            RegistryError::Write { message } => PresenceError::Registry(message),
            RegistryError::StaleMembership {
                connection_id,
                existing,
                ..
            } => PresenceError::StaleConnection {
                connection_id,
                existing,
            },
        }
    }
}

/// 会话存储与会话服务错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session storage error: {0}")]
    Storage(String),
}

impl SessionError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}
