//! Server-sent event streams.
//!
//! Two kinds of stream share one [`ConnectionRegistry`]:
//! - bare `/sse` clients receive a ready notification, periodic pings and a
//!   copy of every `/message` response;
//! - `/sse/{monitor}` clients get a poller that re-runs one diagnostic tool on
//!   a fixed cadence and pushes `update` or `error` events.
//!
//! A poller checks that its client is still registered and its channel still
//! open before every tick, so a disconnect stops it (and its database calls)
//! within one interval.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::protocol::{methods, notification};
use crate::report::Report;
use crate::tools::{ActiveQueries, DiagnosticTool, GetBlockingQueries, ToolRegistry};

const CHANNEL_CAPACITY: usize = 32;
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// One SSE frame before it is turned into an axum [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub event: &'static str,
    pub data: String,
}

impl Outbound {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: "message",
            data: data.into(),
        }
    }

    pub fn update(monitor: &str, report: &Report) -> Self {
        Self {
            event: "update",
            data: json!({
                "timestamp": Utc::now().to_rfc3339(),
                "monitor": monitor,
                "data": report.to_json(),
                "text": report.render_text(),
            })
            .to_string(),
        }
    }

    pub fn error(monitor: &str, message: &str) -> Self {
        Self {
            event: "error",
            data: json!({
                "timestamp": Utc::now().to_rfc3339(),
                "monitor": monitor,
                "error": message,
            })
            .to_string(),
        }
    }

    fn into_event(self) -> Event {
        Event::default().event(self.event).data(self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Bare `/sse`: receives broadcasts.
    Mcp,
    Monitor(String),
}

struct ClientHandle {
    tx: mpsc::Sender<Outbound>,
    kind: StreamKind,
    connected_at: DateTime<Utc>,
}

/// Live SSE clients keyed by a generated id.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<RwLock<HashMap<Uuid, ClientHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: StreamKind) -> (Uuid, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let id = Uuid::new_v4();
        let total = {
            let mut clients = self.clients.write();
            clients.insert(
                id,
                ClientHandle {
                    tx,
                    kind: kind.clone(),
                    connected_at: Utc::now(),
                },
            );
            clients.len()
        };
        tracing::info!(client_id = %id, kind = ?kind, clients = total, "SSE client connected");
        (id, rx)
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        let removed = self.clients.write().remove(id);
        match removed {
            Some(handle) => {
                let secs = (Utc::now() - handle.connected_at).num_seconds();
                tracing::info!(client_id = %id, connected_secs = secs, "SSE client disconnected");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.clients.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// The client's sender, if it is registered and its stream is still open.
    pub fn sender(&self, id: &Uuid) -> Option<mpsc::Sender<Outbound>> {
        self.clients
            .read()
            .get(id)
            .map(|c| c.tx.clone())
            .filter(|tx| !tx.is_closed())
    }

    /// Queue `msg` for every bare `/sse` client. Closed clients are dropped.
    pub fn broadcast(&self, msg: &Outbound) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();
        {
            let clients = self.clients.read();
            for (id, client) in clients.iter().filter(|(_, c)| c.kind == StreamKind::Mcp) {
                match client.tx.try_send(msg.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Closed(_)) => gone.push(*id),
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(client_id = %id, "SSE client is not keeping up; message dropped")
                    }
                }
            }
        }
        for id in gone {
            self.remove(&id);
        }
        delivered
    }

    /// Drop every client so open streams end.
    pub fn close_all(&self) {
        let count = {
            let mut clients = self.clients.write();
            let count = clients.len();
            clients.clear();
            count
        };
        if count > 0 {
            tracing::info!(clients = count, "closed SSE streams");
        }
    }
}

/// Wrap a client's receiver as an axum SSE response.
pub fn event_stream(
    rx: mpsc::Receiver<Outbound>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|msg| Ok(msg.into_event()));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// The ready notification sent first on a bare `/sse` stream.
pub fn ready(id: &Uuid) -> Outbound {
    Outbound::message(
        notification(methods::CONNECTION_READY, json!({ "client_id": id.to_string() })).to_string(),
    )
}

/// Send a JSON-RPC `ping` notification every `every` until the client goes away.
pub async fn keep_pinging(clients: ConnectionRegistry, id: Uuid, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the ready event covers it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(tx) = clients.sender(&id) else {
            clients.remove(&id);
            break;
        };
        let ping = Outbound::message(notification(methods::PING, json!({})).to_string());
        if tx.send(ping).await.is_err() {
            clients.remove(&id);
            break;
        }
    }
}

// ============================================================================
// Monitors
// ============================================================================

/// Named monitor streams that are not plain tool names, or that poll faster.
const BUILTIN_MONITORS: [(&str, &str, u64); 4] = [
    ("test-connection", "test-connection", 5),
    ("health-check", "health-check", 10),
    ("monitor-queries", "active-queries", 2),
    ("monitor-locks", "get-blocking-queries", 3),
];

#[derive(Clone)]
pub struct Monitor {
    pub name: String,
    pub tool: Arc<dyn DiagnosticTool>,
    pub interval: Duration,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("tool", &self.tool.name())
            .field("interval", &self.interval)
            .finish()
    }
}

impl Monitor {
    pub fn new(name: impl Into<String>, tool: Arc<dyn DiagnosticTool>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            tool,
            interval,
        }
    }

    /// Resolve a `/sse/{monitor}` path segment.
    pub fn resolve(name: &str, registry: &ToolRegistry) -> Option<Self> {
        if let Some(&(_, tool, secs)) = BUILTIN_MONITORS.iter().find(|(n, _, _)| *n == name) {
            let tool: Arc<dyn DiagnosticTool> = match tool {
                "active-queries" => Arc::new(ActiveQueries),
                "get-blocking-queries" => Arc::new(GetBlockingQueries),
                other => registry.get(other)?,
            };
            return Some(Self::new(name, tool, Duration::from_secs(secs)));
        }
        registry
            .get(name)
            .map(|tool| Self::new(name, tool, DEFAULT_MONITOR_INTERVAL))
    }

    pub fn names(registry: &ToolRegistry) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_MONITORS.iter().map(|(n, _, _)| n.to_string()).collect();
        for tool in registry.names() {
            if !names.iter().any(|n| n == tool) {
                names.push(tool.to_string());
            }
        }
        names
    }
}

/// Re-run the monitor's tool until the client disconnects.
pub async fn poll_monitor(
    dispatcher: Arc<Dispatcher>,
    clients: ConnectionRegistry,
    id: Uuid,
    monitor: Monitor,
    timeout: Duration,
) {
    let mut ticker = tokio::time::interval(monitor.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(tx) = clients.sender(&id) else {
            clients.remove(&id);
            break;
        };

        let run = dispatcher.run(monitor.tool.as_ref(), Value::Object(Default::default()));
        let msg = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(report)) => Outbound::update(&monitor.name, &report),
            Ok(Err(err)) => Outbound::error(&monitor.name, &dispatcher.redact(&err.to_string())),
            Err(_) => Outbound::error(
                &monitor.name,
                &format!("monitor timed out after {}s", timeout.as_secs_f64()),
            ),
        };

        if tx.send(msg).await.is_err() {
            clients.remove(&id);
            break;
        }
    }
    tracing::debug!(client_id = %id, monitor = %monitor.name, "monitor poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use crate::error::DbError;
    use crate::redact::Redactor;

    fn dispatcher(db: Arc<MockExecutor>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            db,
            Arc::new(ToolRegistry::builtin()),
            Redactor::for_connection_string(Some("postgresql://u:sekrit99@db/x")),
        ))
    }

    #[test]
    fn test_resolve_monitors() {
        let registry = ToolRegistry::builtin();
        let m = Monitor::resolve("monitor-queries", &registry).expect("monitor");
        assert_eq!(m.tool.name(), "active-queries");
        assert_eq!(m.interval, Duration::from_secs(2));

        let m = Monitor::resolve("monitor-locks", &registry).expect("monitor");
        assert_eq!(m.interval, Duration::from_secs(3));

        let m = Monitor::resolve("get-table-stats", &registry).expect("monitor");
        assert_eq!(m.interval, Duration::from_secs(10));

        assert!(Monitor::resolve("nope", &registry).is_none());
        // active-queries is only reachable through its monitor name
        assert!(Monitor::resolve("active-queries", &registry).is_none());
    }

    #[test]
    fn test_monitor_names_unique() {
        let names = Monitor::names(&ToolRegistry::builtin());
        assert_eq!(names.len(), 4 + 11 - 2);
    }

    #[tokio::test]
    async fn test_broadcast_only_reaches_mcp_clients() {
        let clients = ConnectionRegistry::new();
        let (_a, mut rx_a) = clients.register(StreamKind::Mcp);
        let (_b, mut rx_b) = clients.register(StreamKind::Monitor("health-check".into()));
        let (_c, rx_c) = clients.register(StreamKind::Mcp);
        drop(rx_c);

        let delivered = clients.broadcast(&Outbound::message("hello"));
        assert_eq!(delivered, 1);
        assert_eq!(clients.len(), 2);
        assert_eq!(rx_a.recv().await, Some(Outbound::message("hello")));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ready_event() {
        let id = Uuid::new_v4();
        let msg = ready(&id);
        let v: Value = serde_json::from_str(&msg.data).expect("json");
        assert_eq!(v["method"], json!("connection/ready"));
        assert_eq!(v["params"]["client_id"], json!(id.to_string()));
    }

    #[tokio::test]
    async fn test_poller_pushes_updates_and_errors() {
        let db = Arc::new(MockExecutor::new());
        let clients = ConnectionRegistry::new();
        let (id, mut rx) = clients.register(StreamKind::Monitor("test-connection".into()));
        let registry = ToolRegistry::builtin();
        let monitor = Monitor::new(
            "test-connection",
            registry.get("test-connection").expect("tool"),
            Duration::from_millis(10),
        );
        let handle = tokio::spawn(poll_monitor(
            dispatcher(db.clone()),
            clients.clone(),
            id,
            monitor,
            Duration::from_secs(5),
        ));

        let first = rx.recv().await.expect("event");
        assert_eq!(first.event, "update");
        let v: Value = serde_json::from_str(&first.data).expect("json");
        assert_eq!(v["monitor"], json!("test-connection"));
        assert_eq!(v["data"]["connected"], json!(true));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller stops")
            .expect("join");
        assert!(!clients.contains(&id));
    }

    #[tokio::test]
    async fn test_poller_error_event_is_redacted_and_stream_stays_open() {
        let db = Arc::new(MockExecutor::failing(DbError::Statement(
            "permission denied for postgresql://u:sekrit99@db/x".into(),
        )));
        let clients = ConnectionRegistry::new();
        let (id, mut rx) = clients.register(StreamKind::Monitor("health-check".into()));
        let monitor = Monitor::new(
            "health-check",
            ToolRegistry::builtin().get("health-check").expect("tool"),
            Duration::from_millis(10),
        );
        let handle = tokio::spawn(poll_monitor(
            dispatcher(db),
            clients.clone(),
            id,
            monitor,
            Duration::from_secs(5),
        ));

        for _ in 0..2 {
            let msg = rx.recv().await.expect("event");
            assert_eq!(msg.event, "error");
            assert!(!msg.data.contains("sekrit99"));
        }
        assert!(clients.contains(&id));
        drop(rx);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn test_disconnected_client_is_removed_without_database_calls() {
        let db = Arc::new(MockExecutor::new());
        let clients = ConnectionRegistry::new();
        let (id, rx) = clients.register(StreamKind::Monitor("health-check".into()));
        drop(rx);

        let monitor = Monitor::new(
            "health-check",
            ToolRegistry::builtin().get("health-check").expect("tool"),
            Duration::from_millis(20),
        );
        tokio::time::timeout(
            Duration::from_secs(1),
            poll_monitor(dispatcher(db.clone()), clients.clone(), id, monitor, Duration::from_secs(5)),
        )
        .await
        .expect("poller stops within one interval");

        assert!(clients.is_empty());
        assert_eq!(db.calls(), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let clients = ConnectionRegistry::new();
        let (_id, mut rx) = clients.register(StreamKind::Mcp);
        clients.close_all();
        assert!(clients.is_empty());
        assert_eq!(rx.recv().await, None);
    }
}
