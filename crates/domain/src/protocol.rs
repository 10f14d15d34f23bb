//! 线路协议
//!
//! 入站只接受 `ACTION` 事件，`left`/`right` 两个可选字段在边界处被规范化为
//! 单一的 [`ActionKind`]。出站消息以 `event` 字段区分，字段名使用 camelCase。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConnectionId, Members, SessionId};

/// 玩家操作类型：左键翻开，右键插旗。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Reveal,
    Flag,
}

/// 雷区格子坐标（从 0 开始）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPosition {
    pub x: u32,
    pub y: u32,
}

/// 规范化后的玩家操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerAction {
    pub kind: ActionKind,
    pub position: CellPosition,
}

/// 客户端发来的消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    Action(PlayerAction),
}

/// 入站消息的原始形态。消息体中的 `connectionId` 等字段一律忽略。
#[derive(Debug, Deserialize)]
struct RawClientMessage {
    event: String,
    #[serde(default)]
    left: Option<CellPosition>,
    #[serde(default)]
    right: Option<CellPosition>,
}

impl ClientMessage {
    /// 解析入站文本帧。
    ///
    /// `left` 和 `right` 必须恰好出现一个，否则视为协议违规。
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let message: RawClientMessage = serde_json::from_str(raw)
            .map_err(|err| DomainError::malformed(format!("invalid json: {err}")))?;

        if message.event != "ACTION" {
            return Err(DomainError::malformed(format!(
                "unsupported event `{}`",
                message.event
            )));
        }

        let action = match (message.left, message.right) {
            (Some(position), None) => PlayerAction {
                kind: ActionKind::Reveal,
                position,
            },
            (None, Some(position)) => PlayerAction {
                kind: ActionKind::Flag,
                position,
            },
            (None, None) => {
                return Err(DomainError::malformed("action carries neither left nor right"))
            }
            (Some(_), Some(_)) => {
                return Err(DomainError::malformed("action carries both left and right"))
            }
        };

        Ok(ClientMessage::Action(action))
    }
}

/// 服务端推送给客户端的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// 只发给新加入的连接，携带完整的成员快照（包括自己）
    #[serde(rename_all = "camelCase")]
    Joined {
        session_id: SessionId,
        connection_id: ConnectionId,
        all_connection_ids: Members,
    },
    /// 通知已有成员有新连接加入
    #[serde(rename_all = "camelCase")]
    Welcome { new_connection_id: ConnectionId },
    /// 通知剩余成员有连接离开，可批量
    #[serde(rename_all = "camelCase")]
    Left { connection_ids: Members },
    /// 转发玩家操作，`connection_id` 总是传输层分配的真实来源
    #[serde(rename_all = "camelCase")]
    Action {
        connection_id: ConnectionId,
        kind: ActionKind,
        x: u32,
        y: u32,
        // 旧版客户端按 left/right 渲染
        #[serde(default, skip_serializing_if = "Option::is_none")]
        left: Option<CellPosition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<CellPosition>,
    },
}

impl ServerMessage {
    pub fn joined(session_id: SessionId, connection_id: ConnectionId, members: Members) -> Self {
        Self::Joined {
            session_id,
            connection_id,
            all_connection_ids: members,
        }
    }

    pub fn welcome(new_connection_id: ConnectionId) -> Self {
        Self::Welcome { new_connection_id }
    }

    pub fn left(connection_ids: Members) -> Self {
        Self::Left { connection_ids }
    }

    pub fn action(origin: ConnectionId, action: PlayerAction) -> Self {
        let (left, right) = match action.kind {
            ActionKind::Reveal => (Some(action.position), None),
            ActionKind::Flag => (None, Some(action.position)),
        };

        Self::Action {
            connection_id: origin,
            kind: action.kind,
            x: action.position.x,
            y: action.position.y,
            left,
            right,
        }
    }

    /// 事件名，用于日志
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "JOINED",
            Self::Welcome { .. } => "WELCOME",
            Self::Left { .. } => "LEFT",
            Self::Action { .. } => "ACTION",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
