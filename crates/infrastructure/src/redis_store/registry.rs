//! Redis 连接注册表
//!
//! 成员集合与反向索引的每次变更都在一个 Lua 脚本里完成，
//! 多个网关实例共享同一个 Redis 时不会出现先读后写的竞争。

use std::time::Duration;

use application::{retry_async, ConnectionRegistry, RegistryError, RetryConfig};
use async_trait::async_trait;
use domain::{ConnectionId, Members, SessionId};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, warn};

use super::error::{registry_read_error, registry_write_error};
use super::{members_key, reverse_key};

/// 返回 `{1, 成员列表}`；连接仍属于其他会话时返回 `{0, {旧会话}}` 且不做任何修改
const ADD_MEMBER_SCRIPT: &str = r#"
local members_key = KEYS[1]
local reverse_key = KEYS[2]
local session_id = ARGV[1]
local connection_id = ARGV[2]

local existing = redis.call('GET', reverse_key)
if existing and existing ~= session_id then
    return {0, {existing}}
end

redis.call('SADD', members_key, connection_id)
redis.call('SET', reverse_key, session_id)
return {1, redis.call('SMEMBERS', members_key)}
"#;

/// KEYS[1] 为成员集合，KEYS[i]（i > 1）为 ARGV[i] 对应连接的反向索引。
/// 只删除仍指向本会话的反向索引，返回本次确实被移除的成员。
const REMOVE_MEMBERS_SCRIPT: &str = r#"
local members_key = KEYS[1]
local session_id = ARGV[1]
local removed = {}

for i = 2, #KEYS do
    if redis.call('SREM', members_key, ARGV[i]) == 1 then
        table.insert(removed, ARGV[i])
    end
    if redis.call('GET', KEYS[i]) == session_id then
        redis.call('DEL', KEYS[i])
    end
end

return removed
"#;

#[derive(Clone)]
pub struct RedisConnectionRegistry {
    conn: ConnectionManager,
    read_retry: RetryConfig,
    add_script: Script,
    remove_script: Script,
}

impl RedisConnectionRegistry {
    /// 连接 Redis；读操作失败后等待 `read_retry_backoff` 重试一次
    pub async fn connect(
        redis_url: &str,
        read_retry_backoff: Duration,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::with_connection(conn, read_retry_backoff))
    }

    pub fn with_connection(conn: ConnectionManager, read_retry_backoff: Duration) -> Self {
        Self {
            conn,
            read_retry: RetryConfig::once(read_retry_backoff),
            add_script: Script::new(ADD_MEMBER_SCRIPT),
            remove_script: Script::new(REMOVE_MEMBERS_SCRIPT),
        }
    }
}

#[async_trait]
impl ConnectionRegistry for RedisConnectionRegistry {
    async fn add_member(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<Members, RegistryError> {
        let mut conn = self.conn.clone();
        let (status, values): (i64, Vec<String>) = self
            .add_script
            .key(members_key(session_id))
            .key(reverse_key(connection_id))
            .arg(session_id.as_str())
            .arg(connection_id.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(registry_write_error)?;

        if status == 0 {
            let existing = values
                .into_iter()
                .next()
                .map(SessionId::from)
                .ok_or_else(|| RegistryError::write("add script returned no existing session"))?;
            warn!(
                connection_id = %connection_id,
                existing = %existing,
                requested = %session_id,
                "connection still mapped to another session"
            );
            return Err(RegistryError::StaleMembership {
                connection_id: connection_id.clone(),
                existing,
                requested: session_id.clone(),
            });
        }

        Ok(values.into_iter().map(ConnectionId::from).collect())
    }

    async fn remove_members(
        &self,
        session_id: &SessionId,
        connection_ids: &Members,
    ) -> Result<Members, RegistryError> {
        if connection_ids.is_empty() {
            return Ok(Members::new());
        }

        let mut invocation = self.remove_script.key(members_key(session_id));
        invocation.arg(session_id.as_str());
        for connection_id in connection_ids {
            invocation.key(reverse_key(connection_id));
            invocation.arg(connection_id.as_str());
        }

        let mut conn = self.conn.clone();
        let removed: Vec<String> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(registry_write_error)?;

        debug!(session_id = %session_id, removed = removed.len(), "Redis 成员移除完成");
        Ok(removed.into_iter().map(ConnectionId::from).collect())
    }

    async fn members_of(&self, session_id: &SessionId) -> Result<Members, RegistryError> {
        let key = members_key(session_id);
        let members: Vec<String> = retry_async(
            &self.read_retry,
            |_: &redis::RedisError| true,
            || {
                let mut conn = self.conn.clone();
                let key = key.clone();
                async move {
                    redis::cmd("SMEMBERS")
                        .arg(&key)
                        .query_async(&mut conn)
                        .await
                }
            },
        )
        .await
        .map_err(registry_read_error)?;

        Ok(members.into_iter().map(ConnectionId::from).collect())
    }

    async fn session_of(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<SessionId>, RegistryError> {
        let key = reverse_key(connection_id);
        let session: Option<String> = retry_async(
            &self.read_retry,
            |_: &redis::RedisError| true,
            || {
                let mut conn = self.conn.clone();
                let key = key.clone();
                async move { redis::cmd("GET").arg(&key).query_async(&mut conn).await }
            },
        )
        .await
        .map_err(registry_read_error)?;

        Ok(session.map(SessionId::from))
    }
}
