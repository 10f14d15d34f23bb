//! 广播引擎
//!
//! 把同一条消息并发投递给一组连接，并找出其中不可达的连接。
//! 清理（移除成员并发布 `LEFT`）由调用方负责。

use std::sync::Arc;
use std::time::Duration;

use domain::{ConnectionId, Members, ServerMessage};
use futures::future::join_all;
use tokio::time::timeout;

use crate::retry::{retry_async, RetryConfig};
use crate::transport::{DeliveryError, Transport};

#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// 单次投递尝试的超时
    pub delivery_timeout: Duration,
    /// 瞬时失败后的重试间隔
    pub retry_delay: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&config::BroadcastConfig> for BroadcastSettings {
    fn from(value: &config::BroadcastConfig) -> Self {
        Self {
            delivery_timeout: value.delivery_timeout(),
            retry_delay: value.retry_delay(),
        }
    }
}

/// 一次广播的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Members,
    pub failed: Members,
}

#[derive(Clone)]
pub struct BroadcastEngine {
    transport: Arc<dyn Transport>,
    settings: BroadcastSettings,
}

impl BroadcastEngine {
    pub fn new(transport: Arc<dyn Transport>, settings: BroadcastSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// 并发投递 `payload`，等待所有接收方都尝试完毕后返回。
    ///
    /// 单个接收方失败不会影响其他接收方。
    pub async fn broadcast(&self, recipients: &Members, payload: &str) -> BroadcastReport {
        let attempts = recipients.iter().map(|connection_id| async move {
            let result = self.deliver_with_retry(connection_id, payload).await;
            (connection_id, result)
        });

        let mut report = BroadcastReport::default();
        for (connection_id, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    report.delivered.insert(connection_id.clone());
                }
                Err(err) => {
                    tracing::debug!(connection_id = %connection_id, error = %err, "recipient unreachable");
                    report.failed.insert(connection_id.clone());
                }
            }
        }

        if !report.failed.is_empty() {
            tracing::info!(
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "broadcast finished with unreachable recipients"
            );
        }

        report
    }

    /// 序列化消息后广播
    pub async fn send(
        &self,
        recipients: &Members,
        message: &ServerMessage,
    ) -> Result<BroadcastReport, serde_json::Error> {
        let payload = message.to_json()?;
        tracing::debug!(
            event = message.event_name(),
            recipients = recipients.len(),
            "broadcasting"
        );
        Ok(self.broadcast(recipients, &payload).await)
    }

    async fn deliver_with_retry(
        &self,
        connection_id: &ConnectionId,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        retry_async(
            &RetryConfig::once(self.settings.retry_delay),
            |err| matches!(err, DeliveryError::Transient(_)),
            || async move {
                let result = self.attempt(connection_id, payload).await;
                if let Err(DeliveryError::Transient(reason)) = &result {
                    tracing::warn!(connection_id = %connection_id, reason = %reason, "transient delivery failure");
                }
                result
            },
        )
        .await
    }

    async fn attempt(&self, connection_id: &ConnectionId, payload: &str) -> Result<(), DeliveryError> {
        match timeout(
            self.settings.delivery_timeout,
            self.transport.deliver(connection_id, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::transient("delivery timed out")),
        }
    }
}
