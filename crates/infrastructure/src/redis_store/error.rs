//! Redis 错误到应用层错误的映射

use application::{RegistryError, SessionError};

/// 读操作在重试之后仍然失败
pub fn registry_read_error(err: redis::RedisError) -> RegistryError {
    RegistryError::unavailable(format!("Redis 读取失败: {err}"))
}

pub fn registry_write_error(err: redis::RedisError) -> RegistryError {
    RegistryError::write(format!("Redis 写入失败: {err}"))
}

pub fn session_storage_error(err: redis::RedisError) -> SessionError {
    SessionError::storage(format!("Redis operation failed: {err}"))
}
