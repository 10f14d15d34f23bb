//! 会话在线状态协议
//!
//! 每个连接的状态：`Pending`（传输层已接受，尚未加入会话）-> `Active`（恰好属于一个会话）
//! -> `Gone`（终态，已从注册表移除）。服务本身不持有成员状态，所有状态都在注册表中，
//! 因此每个生命周期事件都可以作为独立的调用并发处理。

use std::sync::Arc;

use domain::{ClientMessage, ConnectionId, Members, ServerMessage, SessionId};
use tracing::{debug, info, warn};

use crate::broadcaster::{BroadcastEngine, BroadcastReport};
use crate::error::PresenceError;
use crate::registry::ConnectionRegistry;

/// 单个连接在协议中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Active,
    Gone,
}

impl ConnectionState {
    /// `Gone` 之后不再有任何迁移
    pub fn transition(self, next: ConnectionState) -> ConnectionState {
        match self {
            ConnectionState::Gone => ConnectionState::Gone,
            _ => next,
        }
    }
}

/// 加入会话的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    pub session_id: SessionId,
    /// `JOINED` 中发送的成员快照
    pub members: Members,
    /// 新连接在收到 `JOINED` 之前就已不可达
    pub joiner_gone: bool,
}

/// 断开连接的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Left { session_id: SessionId },
    /// 重复的断开事件，或连接从未完成加入
    AlreadyGone,
}

#[derive(Clone)]
pub struct PresenceService {
    registry: Arc<dyn ConnectionRegistry>,
    broadcaster: BroadcastEngine,
    default_session: Option<SessionId>,
}

impl PresenceService {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        broadcaster: BroadcastEngine,
        default_session: Option<SessionId>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            default_session,
        }
    }

    /// `Pending --CONNECT--> Active`
    ///
    /// 先把包含完整成员快照的 `JOINED` 发给新连接，再向其他成员发送 `WELCOME`。
    pub async fn on_connect(
        &self,
        connection_id: &ConnectionId,
        session_id: Option<SessionId>,
    ) -> Result<JoinReport, PresenceError> {
        let session_id = session_id
            .filter(|id| !id.as_str().trim().is_empty())
            .or_else(|| self.default_session.clone())
            .ok_or_else(|| PresenceError::MissingSession {
                connection_id: connection_id.clone(),
            })?;

        let members = self.registry.add_member(&session_id, connection_id).await?;
        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            members = members.len(),
            "连接加入会话"
        );

        let joiner = Members::from([connection_id.clone()]);
        let joined = ServerMessage::joined(session_id.clone(), connection_id.clone(), members.clone());
        let report = self.broadcaster.send(&joiner, &joined).await?;
        if !report.failed.is_empty() {
            warn!(
                session_id = %session_id,
                connection_id = %connection_id,
                "new connection unreachable before JOINED, removing it"
            );
            self.registry.remove_members(&session_id, &joiner).await?;
            return Ok(JoinReport {
                session_id,
                members,
                joiner_gone: true,
            });
        }

        let others: Members = members
            .iter()
            .filter(|id| *id != connection_id)
            .cloned()
            .collect();
        if !others.is_empty() {
            let welcome = ServerMessage::welcome(connection_id.clone());
            let report = self.broadcaster.send(&others, &welcome).await?;
            self.evict_unreachable(&session_id, &members, report).await?;
        }

        Ok(JoinReport {
            session_id,
            members,
            joiner_gone: false,
        })
    }

    /// `Active --MESSAGE(ACTION)--> Active`
    ///
    /// 来源总是传输层分配的连接标识；广播给包括发送者在内的全部成员。
    pub async fn on_message(
        &self,
        connection_id: &ConnectionId,
        raw: &str,
    ) -> Result<usize, PresenceError> {
        let ClientMessage::Action(action) = ClientMessage::parse(raw).map_err(|err| {
            warn!(connection_id = %connection_id, error = %err, "dropping malformed message");
            PresenceError::MalformedMessage {
                connection_id: connection_id.clone(),
                reason: err.to_string(),
            }
        })?;

        let Some(session_id) = self.registry.session_of(connection_id).await? else {
            warn!(connection_id = %connection_id, "dropping action from connection without session");
            return Err(PresenceError::OrphanAction {
                connection_id: connection_id.clone(),
            });
        };

        let members = self.registry.members_of(&session_id).await?;
        let message = ServerMessage::action(connection_id.clone(), action);
        let report = self.broadcaster.send(&members, &message).await?;
        let delivered = report.delivered.len();
        debug!(
            session_id = %session_id,
            connection_id = %connection_id,
            delivered,
            "action relayed"
        );

        self.evict_unreachable(&session_id, &members, report).await?;
        Ok(delivered)
    }

    /// `Active --DISCONNECT--> Gone`
    pub async fn on_disconnect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<DisconnectOutcome, PresenceError> {
        let Some(session_id) = self.registry.session_of(connection_id).await? else {
            debug!(connection_id = %connection_id, "duplicate disconnect ignored");
            return Ok(DisconnectOutcome::AlreadyGone);
        };

        let members = self.registry.members_of(&session_id).await?;
        let gone = Members::from([connection_id.clone()]);
        let survivors: Members = members.difference(&gone).cloned().collect();

        self.evict(&session_id, gone, survivors).await?;
        info!(session_id = %session_id, connection_id = %connection_id, "连接离开会话");

        Ok(DisconnectOutcome::Left { session_id })
    }

    /// 从注册表推导连接状态。
    ///
    /// 注册表只记录已加入的连接，尚未加入与已经离开都表现为 `Gone`；
    /// `Pending` 只由持有连接的传输层跟踪。
    pub async fn state_of(&self, connection_id: &ConnectionId) -> Result<ConnectionState, PresenceError> {
        match self.registry.session_of(connection_id).await? {
            Some(_) => Ok(ConnectionState::Active),
            None => Ok(ConnectionState::Gone),
        }
    }

    /// 广播中失败的接收方按断开处理
    async fn evict_unreachable(
        &self,
        session_id: &SessionId,
        recipients: &Members,
        report: BroadcastReport,
    ) -> Result<(), PresenceError> {
        if report.failed.is_empty() {
            return Ok(());
        }

        let survivors: Members = recipients.difference(&report.failed).cloned().collect();
        self.evict(session_id, report.failed, survivors).await
    }

    /// 移除 `gone` 并向 `survivors` 发布 `LEFT`。
    ///
    /// `LEFT` 只包含本次调用确实移除的连接，并发清理同一连接时只有一方发布。
    /// 发布 `LEFT` 时失败的接收方在下一轮中同样被移除并通知剩余成员，
    /// 每一轮幸存者都严格减少。
    async fn evict(
        &self,
        session_id: &SessionId,
        mut gone: Members,
        mut survivors: Members,
    ) -> Result<(), PresenceError> {
        while !gone.is_empty() {
            let removed = self.registry.remove_members(session_id, &gone).await?;
            info!(
                session_id = %session_id,
                requested = gone.len(),
                removed = removed.len(),
                "removed connections from session"
            );

            if removed.is_empty() || survivors.is_empty() {
                break;
            }

            let left = ServerMessage::left(removed);
            let report = self.broadcaster.send(&survivors, &left).await?;
            survivors.retain(|id| !report.failed.contains(id));
            gone = report.failed;
        }

        Ok(())
    }
}
