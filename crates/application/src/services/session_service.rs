use std::sync::Arc;

use domain::{generate_mine_layout, BoardDimensions, Session, SessionId, SessionSummary};
use uuid::Uuid;

use crate::{error::SessionError, repository::SessionStore};

pub struct SessionServiceDependencies {
    pub store: Arc<dyn SessionStore>,
    pub board: BoardDimensions,
}

/// 游戏会话的创建、查询和删除
pub struct SessionService {
    deps: SessionServiceDependencies,
}

impl SessionService {
    pub fn new(deps: SessionServiceDependencies) -> Self {
        Self { deps }
    }

    /// 创建会话并一次性生成雷区布局
    pub async fn create(&self, name: String) -> Result<SessionSummary, SessionError> {
        let coordinates = generate_mine_layout(self.deps.board, &mut rand::rng())?;
        let session = Session::new(SessionId::new(Uuid::new_v4().to_string()), name, coordinates)?;
        let summary = session.summary();

        self.deps.store.insert(session).await?;
        tracing::info!(session_id = %summary.id, name = %summary.name, "会话已创建");

        Ok(summary)
    }

    pub async fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.deps
            .store
            .get(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        self.deps.store.list().await
    }

    pub async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        if !self.deps.store.delete(id).await? {
            return Err(SessionError::NotFound(id.clone()));
        }
        tracing::info!(session_id = %id, "会话已删除");
        Ok(())
    }
}
