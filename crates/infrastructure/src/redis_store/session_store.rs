use application::{SessionError, SessionStore};
use async_trait::async_trait;
use domain::{Session, SessionId, SessionSummary};
use redis::aio::ConnectionManager;

use super::error::session_storage_error;
use super::SESSIONS_KEY;

/// 会话元数据以 JSON 形式保存在一个 HASH 中
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn decode(raw: &str) -> Result<Session, SessionError> {
    serde_json::from_str(raw)
        .map_err(|e| SessionError::storage(format!("invalid session payload in Redis: {e}")))
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: Session) -> Result<(), SessionError> {
        let payload = serde_json::to_string(&session)
            .map_err(|e| SessionError::storage(format!("failed to encode session: {e}")))?;

        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HSET")
            .arg(SESSIONS_KEY)
            .arg(session.id.as_str())
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(session_storage_error)?;

        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(SESSIONS_KEY)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(session_storage_error)?;

        raw.as_deref().map(decode).transpose()
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("HVALS")
            .arg(SESSIONS_KEY)
            .query_async(&mut conn)
            .await
            .map_err(session_storage_error)?;

        let mut summaries = raw
            .iter()
            .map(|payload| decode(payload).map(|session| session.summary()))
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("HDEL")
            .arg(SESSIONS_KEY)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(session_storage_error)?;

        Ok(removed > 0)
    }
}
