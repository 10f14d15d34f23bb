use async_trait::async_trait;
use domain::ConnectionId;
use thiserror::Error;

/// 单个连接的投递失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// 连接已不可达，需要从注册表中清理
    #[error("connection is gone")]
    Gone,
    /// 其他投递错误，可以重试
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}

/// 传输层适配器：把序列化好的文本帧投递到指定连接
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, connection_id: &ConnectionId, payload: &str) -> Result<(), DeliveryError>;
}
