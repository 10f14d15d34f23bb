use std::time::Duration;

use application::ConnectionState;
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use domain::{ConnectionId, SessionId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// 断开时等待发送任务写完剩余帧的最长时间
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// WebSocket 连接
///
/// 封装单个 WebSocket 连接的生命周期：
/// - 注册出站队列后再加入会话，保证 `JOINED` 能被投递
/// - 入站文本交给在线状态协议，Ping 回 Pong
/// - 断开时注销出站队列并通知会话其他成员
pub struct WebSocketConnection {
    state: AppState,
    connection_id: ConnectionId,
    requested_session: Option<SessionId>,
    status: ConnectionState,
}

impl WebSocketConnection {
    pub fn new(state: AppState, requested_session: Option<SessionId>) -> Self {
        let connection_id = ConnectionId::new(uuid::Uuid::new_v4().to_string());
        tracing::info!(connection_id = %connection_id, "WebSocket 连接已建立");

        Self {
            state,
            connection_id,
            requested_session,
            status: ConnectionState::Pending,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.status;
        self.status = self.status.transition(next);
        tracing::debug!(
            connection_id = %self.connection_id,
            from = ?previous,
            to = ?self.status,
            "connection state changed"
        );
    }

    /// 运行连接主循环，直到任一方向结束
    pub async fn run(mut self, socket: WebSocket) {
        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(self.state.outbound_buffer);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let closing = matches!(cmd, WsCommand::Close { .. });
                let message = match cmd {
                    WsCommand::SendText(text) => WsMessage::Text(text.into()),
                    WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    WsCommand::Close { code, reason } => WsMessage::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                };
                if sender.send(message).await.is_err() {
                    tracing::warn!("Failed to write websocket frame");
                    break;
                }
                if closing {
                    break;
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        self.state
            .transport
            .register(self.connection_id.clone(), cmd_tx.clone())
            .await;

        match self
            .state
            .presence
            .on_connect(&self.connection_id, self.requested_session.take())
            .await
        {
            Ok(report) if report.joiner_gone => {
                tracing::warn!(connection_id = %self.connection_id, "connection lost before JOINED");
                self.finish(cmd_tx, Some(send_task)).await;
                return;
            }
            Ok(report) => {
                self.transition(ConnectionState::Active);
                tracing::info!(
                    connection_id = %self.connection_id,
                    session_id = %report.session_id,
                    members = report.members.len(),
                    "连接已加入会话"
                );
            }
            Err(err) => {
                tracing::error!(connection_id = %self.connection_id, error = %err, "failed to join session");
                let _ = cmd_tx
                    .send(WsCommand::Close {
                        code: close_code::ERROR,
                        reason: "unable to join session".to_string(),
                    })
                    .await;
                self.finish(cmd_tx, Some(send_task)).await;
                return;
            }
        }

        // 接收任务：处理来自客户端的消息
        let mut recv_task = {
            let presence = self.state.presence.clone();
            let connection_id = self.connection_id.clone();
            let cmd_tx = cmd_tx.clone();

            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    if handle_incoming(&presence, &connection_id, message, &cmd_tx)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tracing::debug!("WebSocket接收任务结束");
            })
        };

        // 等待任意一个任务完成（连接断开）
        let send_finished = tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
                true
            }
            _ = &mut recv_task => false,
        };

        self.finish(cmd_tx, (!send_finished).then_some(send_task)).await;
    }

    /// 注销出站队列并从会话中移除自己
    async fn finish(
        mut self,
        cmd_tx: mpsc::Sender<WsCommand>,
        send_task: Option<JoinHandle<()>>,
    ) {
        self.state.transport.unregister(&self.connection_id).await;
        drop(cmd_tx);
        // 出站队列的所有发送端都已释放，发送任务写完剩余帧后退出；
        // 对端不再读取时写操作会一直阻塞，超时后放弃
        if let Some(send_task) = send_task {
            if !drain_writer(send_task, WRITER_GRACE).await {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    grace_ms = WRITER_GRACE.as_millis() as u64,
                    "writer did not finish in time, aborted"
                );
            }
        }

        match self.state.presence.on_disconnect(&self.connection_id).await {
            Ok(outcome) => {
                tracing::info!(connection_id = %self.connection_id, outcome = ?outcome, "WebSocket连接已断开");
            }
            Err(err) => {
                tracing::error!(connection_id = %self.connection_id, error = %err, "Failed to cleanup presence");
            }
        }
        self.transition(ConnectionState::Gone);
    }
}

/// 等待发送任务结束，超过 `grace` 则中止它；返回任务是否自行结束
async fn drain_writer(mut send_task: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut send_task).await {
        Ok(_) => true,
        Err(_) => {
            send_task.abort();
            false
        }
    }
}

/// 处理来自客户端的一帧；返回 `Err` 表示应结束接收
async fn handle_incoming(
    presence: &application::PresenceService,
    connection_id: &ConnectionId,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Text(text) => match presence.on_message(connection_id, text.as_str()).await {
            Ok(_) => {}
            Err(err) if !err.is_fatal() => {}
            Err(err) => {
                tracing::error!(connection_id = %connection_id, error = %err, "failed to relay action");
            }
        },
        WsMessage::Binary(_) => {
            tracing::warn!(connection_id = %connection_id, "binary frames are not supported");
        }
        WsMessage::Ping(data) => {
            tracing::debug!("收到ping消息，发送pong回应");
            if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                return Err(());
            }
        }
        WsMessage::Pong(_) => {}
        WsMessage::Close(_) => {
            tracing::info!(connection_id = %connection_id, "WebSocket收到关闭消息");
            return Err(());
        }
    }
    Ok(())
}

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
pub(crate) enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
    Close { code: u16, reason: String },
}
