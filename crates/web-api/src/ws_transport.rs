//! WebSocket 传输适配器
//!
//! 每个连接有一个有界出站队列，由该连接的发送任务写入 socket。
//! 找不到队列或队列已关闭都说明连接已经不存在。

use std::collections::HashMap;

use application::{DeliveryError, Transport};
use async_trait::async_trait;
use domain::ConnectionId;
use tokio::sync::{mpsc, RwLock};

use crate::ws_connection::WsCommand;

#[derive(Default)]
pub struct WsTransport {
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<WsCommand>>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn register(&self, connection_id: ConnectionId, sender: mpsc::Sender<WsCommand>) {
        self.senders.write().await.insert(connection_id, sender);
    }

    /// 返回连接此前是否已注册
    pub(crate) async fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.senders.write().await.remove(connection_id).is_some()
    }

    pub async fn connection_count(&self) -> usize {
        self.senders.read().await.len()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn deliver(&self, connection_id: &ConnectionId, payload: &str) -> Result<(), DeliveryError> {
        let sender = self.senders.read().await.get(connection_id).cloned();
        let Some(sender) = sender else {
            return Err(DeliveryError::Gone);
        };

        // 队列满时在这里等待，由广播引擎的投递超时兜底
        sender
            .send(WsCommand::SendText(payload.to_owned()))
            .await
            .map_err(|_| DeliveryError::Gone)
    }
}
