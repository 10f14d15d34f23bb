//! 基础设施层实现。
//!
//! 提供 Redis 连接注册表与会话存储，并根据配置组装应用层使用的存储后端。

pub mod builder;
pub mod redis_store;

pub use builder::{Infrastructure, InfrastructureError};
pub use redis_store::{RedisConnectionRegistry, RedisSessionStore};
