use std::sync::Arc;

use application::{
    BroadcastEngine, BroadcastSettings, ConnectionRegistry, PresenceService, SessionService,
    SessionServiceDependencies, SessionStore,
};
use domain::{BoardDimensions, SessionId};

use crate::ws_transport::WsTransport;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub presence: Arc<PresenceService>,
    pub transport: Arc<WsTransport>,
    /// 每个连接出站队列的容量
    pub outbound_buffer: usize,
}

/// 组装 [`AppState`] 所需的依赖
pub struct AppStateDependencies {
    pub registry: Arc<dyn ConnectionRegistry>,
    pub store: Arc<dyn SessionStore>,
    pub board: BoardDimensions,
    pub broadcast: BroadcastSettings,
    pub default_session: Option<SessionId>,
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(deps: AppStateDependencies) -> Self {
        let transport = Arc::new(WsTransport::new());
        let broadcaster = BroadcastEngine::new(transport.clone(), deps.broadcast);
        let presence = PresenceService::new(deps.registry, broadcaster, deps.default_session);
        let sessions = SessionService::new(SessionServiceDependencies {
            store: deps.store,
            board: deps.board,
        });

        Self {
            sessions: Arc::new(sessions),
            presence: Arc::new(presence),
            transport,
            outbound_buffer: deps.outbound_buffer.max(1),
        }
    }
}
