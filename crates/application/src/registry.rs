use async_trait::async_trait;
use domain::{ConnectionId, Members, SessionId};

use crate::error::RegistryError;

/// 连接注册表trait
///
/// 会话 -> 成员连接集合，以及连接 -> 会话的反向索引，是“谁在这个会话里”的唯一来源。
/// 实现必须把集合的并/差与反向索引的更新做成存储层的单个原子操作，
/// 不能在应用层先读后写。
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// 将连接加入会话，返回加入后的完整成员集合（包含自己）。
    ///
    /// 重复加入是幂等的；连接仍属于其他会话时返回 [`RegistryError::StaleMembership`]。
    async fn add_member(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<Members, RegistryError>;

    /// 从会话中移除一批连接，返回本次调用确实移除的连接。
    ///
    /// 并发移除同一连接时只有一个调用会在结果中看到它。
    async fn remove_members(
        &self,
        session_id: &SessionId,
        connection_ids: &Members,
    ) -> Result<Members, RegistryError>;

    /// 会话当前成员的时间点快照，可能与并发的增删存在竞争
    async fn members_of(&self, session_id: &SessionId) -> Result<Members, RegistryError>;

    /// 反向查询连接所属会话；`None` 表示连接已被移除或从未加入
    async fn session_of(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<SessionId>, RegistryError>;
}

/// 内存实现的连接注册表（单进程部署与测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct Inner {
        members: HashMap<SessionId, Members>,
        sessions: HashMap<ConnectionId, SessionId>,
    }

    /// 两个索引放在同一把锁下，每次变更都是一个临界区
    #[derive(Default)]
    pub struct MemoryConnectionRegistry {
        inner: RwLock<Inner>,
    }

    impl MemoryConnectionRegistry {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ConnectionRegistry for MemoryConnectionRegistry {
        async fn add_member(
            &self,
            session_id: &SessionId,
            connection_id: &ConnectionId,
        ) -> Result<Members, RegistryError> {
            let mut inner = self.inner.write().await;

            if let Some(existing) = inner.sessions.get(connection_id) {
                if existing != session_id {
                    return Err(RegistryError::StaleMembership {
                        connection_id: connection_id.clone(),
                        existing: existing.clone(),
                        requested: session_id.clone(),
                    });
                }
            }

            inner
                .sessions
                .insert(connection_id.clone(), session_id.clone());
            let members = inner.members.entry(session_id.clone()).or_default();
            members.insert(connection_id.clone());

            Ok(members.clone())
        }

        async fn remove_members(
            &self,
            session_id: &SessionId,
            connection_ids: &Members,
        ) -> Result<Members, RegistryError> {
            let mut inner = self.inner.write().await;
            let Inner { members, sessions } = &mut *inner;

            let mut removed = Members::new();
            if let Some(set) = members.get_mut(session_id) {
                for connection_id in connection_ids {
                    if set.remove(connection_id) {
                        removed.insert(connection_id.clone());
                    }
                }
                if set.is_empty() {
                    members.remove(session_id);
                }
            }

            for connection_id in connection_ids {
                if sessions.get(connection_id) == Some(session_id) {
                    sessions.remove(connection_id);
                }
            }

            Ok(removed)
        }

        async fn members_of(&self, session_id: &SessionId) -> Result<Members, RegistryError> {
            let inner = self.inner.read().await;
            Ok(inner.members.get(session_id).cloned().unwrap_or_default())
        }

        async fn session_of(
            &self,
            connection_id: &ConnectionId,
        ) -> Result<Option<SessionId>, RegistryError> {
            let inner = self.inner.read().await;
            Ok(inner.sessions.get(connection_id).cloned())
        }
    }

}
