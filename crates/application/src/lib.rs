//! 应用层实现。
//!
//! 这里提供会话在线状态协议的用例服务：连接注册表、广播引擎、
//! 在线状态状态机以及会话存储，并抽象出传输层与存储层两个外部适配器。

pub mod broadcaster;
pub mod error;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod services;
pub mod transport;

pub use broadcaster::{BroadcastEngine, BroadcastReport, BroadcastSettings};
pub use error::{PresenceError, RegistryError, SessionError};
pub use presence::{ConnectionState, DisconnectOutcome, JoinReport, PresenceService};
pub use registry::ConnectionRegistry;
pub use repository::SessionStore;
pub use retry::{retry_async, Backoff, RetryConfig};
pub use services::{SessionService, SessionServiceDependencies};
pub use transport::{DeliveryError, Transport};
