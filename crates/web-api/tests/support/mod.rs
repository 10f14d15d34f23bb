use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::registry::memory::MemoryConnectionRegistry;
use application::repository::memory::MemorySessionStore;
use application::{BroadcastSettings, ConnectionRegistry};
use domain::{BoardDimensions, SessionId};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, AppStateDependencies};

/// 在随机端口上运行的内存版服务
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(default_session: Option<&str>) -> Self {
        Self::start_with(Arc::new(MemoryConnectionRegistry::new()), default_session).await
    }

    /// 使用指定的连接注册表启动
    pub async fn start_with(
        registry: Arc<dyn ConnectionRegistry>,
        default_session: Option<&str>,
    ) -> Self {
        let state = AppState::new(AppStateDependencies {
            registry,
            store: Arc::new(MemorySessionStore::new()),
            board: BoardDimensions {
                width: 8,
                height: 8,
                mines: 10,
            },
            broadcast: BroadcastSettings {
                delivery_timeout: Duration::from_millis(500),
                retry_delay: Duration::from_millis(10),
            },
            default_session: default_session.map(SessionId::from),
            outbound_buffer: 16,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, query: &str) -> String {
        format!("ws://{}/ws{}", self.addr, query)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
