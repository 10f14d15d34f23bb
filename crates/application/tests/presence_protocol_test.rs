//! 在线状态协议测试
//!
//! 使用内存注册表与记录型传输层，验证加入快照、欢迎消息、操作转发、
//! 断开与投递失败清理的完整流程。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::registry::memory::MemoryConnectionRegistry;
use application::{
    retry_async, BroadcastEngine, BroadcastSettings, ConnectionRegistry, ConnectionState,
    DeliveryError, DisconnectOutcome, PresenceError, PresenceService, RegistryError, RetryConfig,
    Transport,
};
use domain::{ConnectionId, Members, SessionId};
use serde_json::{json, Value};

/// 记录每个连接收到的消息，可把指定连接标记为不可达
#[derive(Default)]
struct RecordingTransport {
    log: Mutex<Vec<(ConnectionId, Value)>>,
    gone: Mutex<HashSet<ConnectionId>>,
    latency: Mutex<Duration>,
}

impl RecordingTransport {
    fn received(&self, connection_id: &str) -> Vec<Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id.as_str() == connection_id)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn total(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    fn mark_gone(&self, connection_id: &str) {
        self.gone.lock().unwrap().insert(connection_id.into());
    }

    fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// 每次投递先等待 `latency`，让并发调用在投递结果返回前交错
    fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, connection_id: &ConnectionId, payload: &str) -> Result<(), DeliveryError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.gone.lock().unwrap().contains(connection_id) {
            return Err(DeliveryError::Gone);
        }
        let value: Value = serde_json::from_str(payload).expect("outbound payload is json");
        self.log.lock().unwrap().push((connection_id.clone(), value));
        Ok(())
    }
}

/// 内存注册表外包一层可注入的故障：读操作按 Redis 实现的方式重试一次，
/// 前 `read_failures` 次读取失败；`fail_writes` 打开后所有写操作失败
struct FailingRegistry {
    inner: MemoryConnectionRegistry,
    read_retry: RetryConfig,
    read_failures: AtomicU32,
    read_attempts: AtomicU32,
    fail_writes: AtomicBool,
}

impl FailingRegistry {
    fn new() -> Self {
        Self {
            inner: MemoryConnectionRegistry::new(),
            read_retry: RetryConfig::once(Duration::from_millis(1)),
            read_failures: AtomicU32::new(0),
            read_attempts: AtomicU32::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn fail_next_reads(&self, count: u32) {
        self.read_failures.store(count, Ordering::SeqCst);
        self.read_attempts.store(0, Ordering::SeqCst);
    }

    fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read_attempts(&self) -> u32 {
        self.read_attempts.load(Ordering::SeqCst)
    }

    fn read_attempt(&self) -> Result<(), RegistryError> {
        self.read_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            Err(RegistryError::unavailable("read timed out"))
        } else {
            Ok(())
        }
    }

    fn write_attempt(&self) -> Result<(), RegistryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(RegistryError::write("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl ConnectionRegistry for FailingRegistry {
    async fn add_member(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<Members, RegistryError> {
        self.write_attempt()?;
        self.inner.add_member(session_id, connection_id).await
    }

    async fn remove_members(
        &self,
        session_id: &SessionId,
        connection_ids: &Members,
    ) -> Result<Members, RegistryError> {
        self.write_attempt()?;
        self.inner.remove_members(session_id, connection_ids).await
    }

    async fn members_of(&self, session_id: &SessionId) -> Result<Members, RegistryError> {
        retry_async(&self.read_retry, |_: &RegistryError| true, || async {
            self.read_attempt()?;
            self.inner.members_of(session_id).await
        })
        .await
    }

    async fn session_of(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<SessionId>, RegistryError> {
        retry_async(&self.read_retry, |_: &RegistryError| true, || async {
            self.read_attempt()?;
            self.inner.session_of(connection_id).await
        })
        .await
    }
}

fn presence_over(
    registry: Arc<dyn ConnectionRegistry>,
    transport: Arc<RecordingTransport>,
    default_session: Option<&str>,
) -> PresenceService {
    let broadcaster = BroadcastEngine::new(
        transport,
        BroadcastSettings {
            delivery_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(1),
        },
    );
    PresenceService::new(registry, broadcaster, default_session.map(SessionId::new))
}

struct Harness {
    registry: Arc<MemoryConnectionRegistry>,
    transport: Arc<RecordingTransport>,
    presence: PresenceService,
}

impl Harness {
    fn new(default_session: Option<&str>) -> Self {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        let transport = Arc::new(RecordingTransport::default());
        let presence = presence_over(registry.clone(), transport.clone(), default_session);

        Self {
            registry,
            transport,
            presence,
        }
    }

    async fn connect(&self, connection_id: &str, session_id: &str) {
        self.presence
            .on_connect(&connection_id.into(), Some(session_id.into()))
            .await
            .expect("connect");
    }

    async fn members(&self, session_id: &str) -> Members {
        self.registry.members_of(&session_id.into()).await.unwrap()
    }
}

fn ids(values: &[&str]) -> Members {
    values.iter().map(|v| ConnectionId::new(*v)).collect()
}

#[tokio::test]
async fn two_player_scenario() {
    let h = Harness::new(None);

    h.connect("c1", "S1").await;
    assert_eq!(
        h.transport.received("c1"),
        vec![json!({
            "event": "JOINED",
            "sessionId": "S1",
            "connectionId": "c1",
            "allConnectionIds": ["c1"],
        })]
    );
    assert_eq!(h.transport.total(), 1, "no WELCOME for the first member");

    h.transport.clear();
    h.connect("c2", "S1").await;
    assert_eq!(
        h.transport.received("c2"),
        vec![json!({
            "event": "JOINED",
            "sessionId": "S1",
            "connectionId": "c2",
            "allConnectionIds": ["c1", "c2"],
        })]
    );
    assert_eq!(
        h.transport.received("c1"),
        vec![json!({"event": "WELCOME", "newConnectionId": "c2"})]
    );

    h.transport.clear();
    let delivered = h
        .presence
        .on_message(&"c2".into(), r#"{"event":"ACTION","left":{"x":3,"y":4}}"#)
        .await
        .unwrap();
    assert_eq!(delivered, 2);
    let expected_action = json!({
        "event": "ACTION",
        "connectionId": "c2",
        "kind": "reveal",
        "x": 3,
        "y": 4,
        "left": {"x": 3, "y": 4},
    });
    assert_eq!(h.transport.received("c1"), vec![expected_action.clone()]);
    assert_eq!(h.transport.received("c2"), vec![expected_action]);

    h.transport.clear();
    let outcome = h.presence.on_disconnect(&"c1".into()).await.unwrap();
    assert_eq!(
        outcome,
        DisconnectOutcome::Left {
            session_id: "S1".into()
        }
    );
    assert_eq!(
        h.transport.received("c2"),
        vec![json!({"event": "LEFT", "connectionIds": ["c1"]})]
    );
    assert!(h.transport.received("c1").is_empty());
    assert_eq!(h.members("S1").await, ids(&["c2"]));
}

#[tokio::test]
async fn join_snapshot_is_complete_and_welcome_excludes_joiner() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.connect("B", "S").await;
    h.transport.clear();

    let report = h
        .presence
        .on_connect(&"C".into(), Some("S".into()))
        .await
        .unwrap();

    assert_eq!(report.members, ids(&["A", "B", "C"]));
    assert!(!report.joiner_gone);

    let joined = h.transport.received("C");
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0]["event"], "JOINED");
    assert_eq!(joined[0]["allConnectionIds"], json!(["A", "B", "C"]));

    for peer in ["A", "B"] {
        assert_eq!(
            h.transport.received(peer),
            vec![json!({"event": "WELCOME", "newConnectionId": "C"})]
        );
    }
}

#[tokio::test]
async fn joined_is_delivered_before_welcome() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.transport.clear();

    h.connect("B", "S").await;

    let log = h.transport.log.lock().unwrap().clone();
    let events: Vec<_> = log
        .iter()
        .map(|(id, value)| (id.as_str().to_owned(), value["event"].as_str().unwrap().to_owned()))
        .collect();
    assert_eq!(
        events,
        vec![
            ("B".to_owned(), "JOINED".to_owned()),
            ("A".to_owned(), "WELCOME".to_owned()),
        ]
    );
}

#[tokio::test]
async fn dead_recipient_is_removed_and_announced() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.connect("B", "S").await;
    h.connect("X", "S").await;
    h.transport.clear();
    h.transport.mark_gone("X");

    h.presence
        .on_message(&"A".into(), r#"{"event":"ACTION","right":{"x":1,"y":2}}"#)
        .await
        .unwrap();

    for peer in ["A", "B"] {
        let received = h.transport.received(peer);
        assert_eq!(received.len(), 2, "{peer} gets the action and the departure");
        assert_eq!(received[0]["event"], "ACTION");
        assert_eq!(received[0]["kind"], "flag");
        assert_eq!(received[1], json!({"event": "LEFT", "connectionIds": ["X"]}));
    }
    assert_eq!(h.members("S").await, ids(&["A", "B"]));
    assert_eq!(h.registry.session_of(&"X".into()).await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_cleanups_announce_a_departure_once() {
    let h = Harness::new(None);
    for id in ["a", "b", "dead"] {
        h.connect(id, "S1").await;
    }
    h.transport.clear();
    h.transport.mark_gone("dead");
    h.transport.set_latency(Duration::from_millis(20));

    // 两次广播都在对方移除 dead 之前发现它不可达
    let action = r#"{"event":"ACTION","left":{"x":1,"y":1}}"#;
    let (conn_a, conn_b): (ConnectionId, ConnectionId) = ("a".into(), "b".into());
    let (from_a, from_b) = tokio::join!(
        h.presence.on_message(&conn_a, action),
        h.presence.on_message(&conn_b, action),
    );
    from_a.unwrap();
    from_b.unwrap();

    for peer in ["a", "b"] {
        let left: Vec<_> = h
            .transport
            .received(peer)
            .into_iter()
            .filter(|value| value["event"] == "LEFT")
            .collect();
        assert_eq!(
            left,
            vec![json!({"event": "LEFT", "connectionIds": ["dead"]})],
            "{peer} hears about dead exactly once"
        );
    }
    assert_eq!(h.members("S1").await, ids(&["a", "b"]));
}

#[tokio::test]
async fn disconnect_racing_delivery_failure_announces_once() {
    let h = Harness::new(None);
    for id in ["a", "b", "c"] {
        h.connect(id, "S1").await;
    }
    h.transport.clear();
    h.transport.mark_gone("c");
    h.transport.set_latency(Duration::from_millis(20));

    let (conn_a, conn_c): (ConnectionId, ConnectionId) = ("a".into(), "c".into());
    let (relayed, left) = tokio::join!(
        h.presence
            .on_message(&conn_a, r#"{"event":"ACTION","right":{"x":0,"y":0}}"#),
        h.presence.on_disconnect(&conn_c),
    );
    relayed.unwrap();
    left.unwrap();

    let departures = h
        .transport
        .received("b")
        .into_iter()
        .filter(|value| value["event"] == "LEFT")
        .count();
    assert_eq!(departures, 1);
    assert_eq!(h.members("S1").await, ids(&["a", "b"]));
}

#[tokio::test]
async fn failed_join_write_surfaces_and_sends_nothing() {
    let registry = Arc::new(FailingRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let presence = presence_over(registry.clone(), transport.clone(), None);
    registry.fail_writes(true);

    let err = presence
        .on_connect(&"A".into(), Some("S".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, PresenceError::Registry(_)), "{err:?}");
    assert!(err.is_fatal());
    assert_eq!(transport.total(), 0);
    assert!(registry.inner.members_of(&"S".into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn registry_read_is_retried_once_then_unavailable() {
    let registry = Arc::new(FailingRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let presence = presence_over(registry.clone(), transport.clone(), None);
    for id in ["A", "B"] {
        presence.on_connect(&id.into(), Some("S".into())).await.unwrap();
    }
    transport.clear();

    registry.fail_next_reads(2);
    let err = presence
        .on_message(&"A".into(), r#"{"event":"ACTION","left":{"x":2,"y":2}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, PresenceError::RegistryUnavailable(_)), "{err:?}");
    assert!(err.is_fatal());
    assert_eq!(registry.read_attempts(), 2, "one attempt plus one retry");

    registry.fail_next_reads(2);
    let err = presence.on_disconnect(&"B".into()).await.unwrap_err();
    assert!(matches!(err, PresenceError::RegistryUnavailable(_)), "{err:?}");

    assert_eq!(transport.total(), 0);
    assert_eq!(
        registry.inner.members_of(&"S".into()).await.unwrap(),
        ids(&["A", "B"]),
        "a failed read never mutates membership"
    );
}

#[tokio::test]
async fn single_read_failure_is_absorbed_by_retry() {
    let registry = Arc::new(FailingRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let presence = presence_over(registry.clone(), transport.clone(), None);
    for id in ["A", "B"] {
        presence.on_connect(&id.into(), Some("S".into())).await.unwrap();
    }
    transport.clear();

    registry.fail_next_reads(1);
    let delivered = presence
        .on_message(&"A".into(), r#"{"event":"ACTION","left":{"x":2,"y":2}}"#)
        .await
        .unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(transport.total(), 2);
}

#[tokio::test]
async fn failed_removal_surfaces_without_announcing() {
    let registry = Arc::new(FailingRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let presence = presence_over(registry.clone(), transport.clone(), None);
    for id in ["A", "B"] {
        presence.on_connect(&id.into(), Some("S".into())).await.unwrap();
    }
    transport.clear();
    registry.fail_writes(true);

    let err = presence.on_disconnect(&"A".into()).await.unwrap_err();

    assert!(matches!(err, PresenceError::Registry(_)), "{err:?}");
    assert_eq!(transport.total(), 0, "no LEFT for a removal that did not happen");
}

#[tokio::test]
async fn forged_origin_is_replaced_by_transport_id() {
    let h = Harness::new(None);
    h.connect("honest", "S").await;
    h.connect("victim", "S").await;
    h.transport.clear();

    h.presence
        .on_message(
            &"honest".into(),
            r#"{"event":"ACTION","left":{"x":0,"y":0},"connectionId":"victim"}"#,
        )
        .await
        .unwrap();

    for peer in ["honest", "victim"] {
        let received = h.transport.received(peer);
        assert_eq!(received[0]["connectionId"], "honest");
    }
}

#[tokio::test]
async fn action_without_session_is_an_orphan() {
    let h = Harness::new(None);

    let err = h
        .presence
        .on_message(&"stranger".into(), r#"{"event":"ACTION","left":{"x":0,"y":0}}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, PresenceError::OrphanAction { .. }));
    assert!(!err.is_fatal());
    assert_eq!(h.transport.total(), 0);
}

#[tokio::test]
async fn malformed_action_is_dropped_without_broadcast() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.connect("B", "S").await;
    h.transport.clear();

    for raw in [
        r#"{"event":"ACTION"}"#,
        r#"{"event":"ACTION","left":{"x":1,"y":1},"right":{"x":1,"y":1}}"#,
        "garbage",
    ] {
        let err = h.presence.on_message(&"A".into(), raw).await.unwrap_err();
        assert!(matches!(err, PresenceError::MalformedMessage { .. }), "{raw}");
        assert!(!err.is_fatal());
    }

    assert_eq!(h.transport.total(), 0);
    assert_eq!(h.members("S").await, ids(&["A", "B"]));
}

#[tokio::test]
async fn duplicate_disconnect_is_idempotent() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.connect("B", "S").await;

    h.presence.on_disconnect(&"A".into()).await.unwrap();
    h.transport.clear();

    let outcome = h.presence.on_disconnect(&"A".into()).await.unwrap();

    assert_eq!(outcome, DisconnectOutcome::AlreadyGone);
    assert_eq!(h.transport.total(), 0);
    assert_eq!(h.presence.state_of(&"A".into()).await.unwrap(), ConnectionState::Gone);
    assert_eq!(h.presence.state_of(&"B".into()).await.unwrap(), ConnectionState::Active);
    assert_eq!(h.members("S").await, ids(&["B"]));
}

#[tokio::test]
async fn last_member_leaving_empties_session() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.transport.clear();

    h.presence.on_disconnect(&"A".into()).await.unwrap();

    assert!(h.members("S").await.is_empty());
    assert_eq!(h.transport.total(), 0);
}

#[tokio::test]
async fn missing_session_uses_default_or_fails() {
    let with_default = Harness::new(Some("game-x"));
    let report = with_default
        .presence
        .on_connect(&"A".into(), None)
        .await
        .unwrap();
    assert_eq!(report.session_id.as_str(), "game-x");

    let blank = with_default
        .presence
        .on_connect(&"B".into(), Some("  ".into()))
        .await
        .unwrap();
    assert_eq!(blank.session_id.as_str(), "game-x");

    let without_default = Harness::new(None);
    let err = without_default
        .presence
        .on_connect(&"A".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PresenceError::MissingSession { .. }));
    assert!(err.is_fatal());
    assert_eq!(without_default.transport.total(), 0);
}

#[tokio::test]
async fn reconnect_under_new_session_is_stale() {
    let h = Harness::new(None);
    h.connect("A", "S1").await;
    h.transport.clear();

    let err = h
        .presence
        .on_connect(&"A".into(), Some("S2".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, PresenceError::StaleConnection { .. }));
    assert_eq!(h.transport.total(), 0);
    assert_eq!(h.members("S1").await, ids(&["A"]));
    assert!(h.members("S2").await.is_empty());
}

#[tokio::test]
async fn joiner_unreachable_before_joined_is_removed_quietly() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.transport.clear();
    h.transport.mark_gone("B");

    let report = h
        .presence
        .on_connect(&"B".into(), Some("S".into()))
        .await
        .unwrap();

    assert!(report.joiner_gone);
    assert_eq!(h.transport.total(), 0, "no WELCOME for a joiner that is already gone");
    assert_eq!(h.members("S").await, ids(&["A"]));
}

#[tokio::test]
async fn failed_welcome_recipient_is_announced_to_joiner() {
    let h = Harness::new(None);
    h.connect("A", "S").await;
    h.connect("Z", "S").await;
    h.transport.clear();
    h.transport.mark_gone("Z");

    h.connect("B", "S").await;

    let received = h.transport.received("B");
    assert_eq!(received[0]["event"], "JOINED");
    assert_eq!(received[0]["allConnectionIds"], json!(["A", "B", "Z"]));
    assert_eq!(received[1], json!({"event": "LEFT", "connectionIds": ["Z"]}));
    assert_eq!(h.members("S").await, ids(&["A", "B"]));
}

#[tokio::test]
async fn eviction_cascades_through_failed_left_recipients() {
    let h = Harness::new(None);
    for id in ["A", "B", "C"] {
        h.connect(id, "S").await;
    }
    h.transport.clear();
    h.transport.mark_gone("C");

    // A 离开时，C 在接收 LEFT 时被发现已断开
    h.presence.on_disconnect(&"A".into()).await.unwrap();

    assert_eq!(
        h.transport.received("B"),
        vec![
            json!({"event": "LEFT", "connectionIds": ["A"]}),
            json!({"event": "LEFT", "connectionIds": ["C"]}),
        ]
    );
    assert_eq!(h.members("S").await, ids(&["B"]));
}

#[tokio::test]
async fn reverse_index_stays_consistent_with_membership() {
    let h = Harness::new(None);
    for (id, session) in [("a", "S1"), ("b", "S1"), ("c", "S2"), ("d", "S2")] {
        h.connect(id, session).await;
    }
    h.presence.on_disconnect(&"b".into()).await.unwrap();
    h.transport.mark_gone("d");
    h.presence
        .on_message(&"c".into(), r#"{"event":"ACTION","left":{"x":9,"y":9}}"#)
        .await
        .unwrap();

    for id in ["a", "b", "c", "d"] {
        let connection_id = ConnectionId::new(id);
        match h.registry.session_of(&connection_id).await.unwrap() {
            Some(session) => assert!(h.members(session.as_str()).await.contains(&connection_id)),
            None => {
                for session in ["S1", "S2"] {
                    assert!(!h.members(session).await.contains(&connection_id));
                }
            }
        }
    }
    assert_eq!(h.members("S1").await, ids(&["a"]));
    assert_eq!(h.members("S2").await, ids(&["c"]));
}

#[tokio::test]
async fn concurrent_joins_each_see_themselves() {
    let h = Arc::new(Harness::new(None));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                let id = ConnectionId::new(format!("c{i}"));
                let report = h
                    .presence
                    .on_connect(&id, Some("S".into()))
                    .await
                    .unwrap();
                assert!(report.members.contains(&id));
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(h.members("S").await.len(), 16);
    for i in 0..16 {
        let joined = h
            .transport
            .received(&format!("c{i}"))
            .into_iter()
            .filter(|value| value["event"] == "JOINED")
            .count();
        assert_eq!(joined, 1, "c{i} receives exactly one JOINED");
    }
}
