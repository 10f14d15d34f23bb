use async_trait::async_trait;
use domain::{Session, SessionId, SessionSummary};

use crate::error::SessionError;

/// 会话存储。核心协议只读取会话标识，从不修改会话元数据。
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), SessionError>;
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError>;
    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError>;
    /// 返回会话在删除前是否存在
    async fn delete(&self, id: &SessionId) -> Result<bool, SessionError>;
}

/// 内存实现的会话存储
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemorySessionStore {
        sessions: RwLock<HashMap<SessionId, Session>>,
    }

    impl MemorySessionStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SessionStore for MemorySessionStore {
        async fn insert(&self, session: Session) -> Result<(), SessionError> {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session.id.clone(), session);
            Ok(())
        }

        async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
            let sessions = self.sessions.read().await;
            Ok(sessions.get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
            let sessions = self.sessions.read().await;
            let mut summaries: Vec<_> = sessions.values().map(Session::summary).collect();
            summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
            Ok(summaries)
        }

        async fn delete(&self, id: &SessionId) -> Result<bool, SessionError> {
            let mut sessions = self.sessions.write().await;
            Ok(sessions.remove(id).is_some())
        }
    }
}
