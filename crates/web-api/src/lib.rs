//! Web API 层。
//!
//! 提供 Axum 路由：游戏会话的 HTTP 接口，以及承载在线状态协议的 WebSocket 端点。
//! WebSocket 连接通过 [`WsTransport`] 接入应用层的传输抽象。

mod error;
mod routes;
mod state;
mod ws_connection;
mod ws_transport;

pub use error::ApiError;
pub use routes::{cors_layer, router};
pub use state::{AppState, AppStateDependencies};
pub use ws_transport::WsTransport;
