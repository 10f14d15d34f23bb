//! 多人扫雷会话的核心领域模型
//!
//! 包含会话、连接标识、雷区布局以及客户端与服务端之间的线路消息。

pub mod errors;
pub mod protocol;
pub mod session;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use protocol::*;
pub use session::*;
pub use value_objects::*;
