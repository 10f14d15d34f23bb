use std::sync::Arc;

use application::registry::memory::MemoryConnectionRegistry;
use application::repository::memory::MemorySessionStore;
use application::{ConnectionRegistry, SessionStore};
use config::{RegistryBackend, RegistryConfig};
use thiserror::Error;
use tracing::info;

use crate::redis_store::{RedisConnectionRegistry, RedisSessionStore};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("registry backend `redis` requires `registry.redis_url`")]
    MissingRedisUrl,
}

/// 应用层使用的存储后端
#[derive(Clone)]
pub struct Infrastructure {
    pub registry: Arc<dyn ConnectionRegistry>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Infrastructure {
    pub async fn connect(config: &RegistryConfig) -> Result<Self, InfrastructureError> {
        match config.backend {
            RegistryBackend::Memory => Ok(Self::in_memory()),
            RegistryBackend::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or(InfrastructureError::MissingRedisUrl)?;
                let registry =
                    RedisConnectionRegistry::connect(url, config.read_retry_backoff()).await?;
                let sessions = RedisSessionStore::connect(url).await?;
                info!("使用 Redis 连接注册表与会话存储");

                Ok(Self {
                    registry: Arc::new(registry),
                    sessions: Arc::new(sessions),
                })
            }
        }
    }

    /// 单进程部署：注册表和会话存储都在内存中
    pub fn in_memory() -> Self {
        info!("使用内存连接注册表与会话存储");
        Self {
            registry: Arc::new(MemoryConnectionRegistry::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }
}
