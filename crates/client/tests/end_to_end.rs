//! End-to-end tests: the real client stack against the real server router on
//! an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use readylayer_client::{RealtimeClient, StaticCredentials};
use readylayer_core::{Category, ConnectionStatus, DeltaEvent, Scope, SyncError};
use readylayer_server::{http, store::DashboardStore, AuthRegistry, Envelope, MemoryStore};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;

async fn serve() -> (String, http::AppState) {
    let auth = AuthRegistry::parse_grants(&["tok:org-1,org-2".into()]).unwrap();
    let state = http::AppState::new(
        Arc::new(MemoryStore::new()),
        auth,
        Duration::from_millis(200),
    );
    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

async fn wait_watch<T: Clone + Send + Sync>(
    rx: &mut watch::Receiver<T>,
    pred: impl Fn(&T) -> bool,
) -> T {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let v = rx.borrow_and_update();
                if pred(&v) {
                    return v.clone();
                }
            }
            rx.changed().await.expect("watch channel open");
        }
    })
    .await
    .expect("condition within deadline")
}

#[tokio::test]
async fn activation_serves_snapshot_and_connects() {
    let (base, state) = serve().await;
    let scope = Scope::org("org-1");
    state
        .store
        .put(Category::Findings, &scope, json!({"id": "f-1"}))
        .unwrap();
    state
        .store
        .put(Category::Findings, &scope, json!({"id": "f-2"}))
        .unwrap();

    let client = RealtimeClient::new(&base, StaticCredentials::new("tok")).unwrap();
    let query = client.query(scope, Category::Findings);

    let mut state_rx = query.subscribe();
    let qs = wait_watch(&mut state_rx, |s| s.data.is_some()).await;
    let page = qs.data.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.pagination.total, 2);
    assert!(!page.pagination.has_more);

    let mut status_rx = query.connection_status();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Connected).await;
}

#[tokio::test]
async fn delta_refetches_its_category_only() {
    let (base, state) = serve().await;
    let scope = Scope::org("org-1");
    state
        .store
        .put(Category::Findings, &scope, json!({"id": "f-1"}))
        .unwrap();
    state
        .store
        .put(Category::Metrics, &scope, json!({"name": "kudos"}))
        .unwrap();

    let client = RealtimeClient::new(&base, StaticCredentials::new("tok")).unwrap();
    let findings = client.query(scope.clone(), Category::Findings);
    let metrics = client.query(scope.clone(), Category::Metrics);

    let mut findings_rx = findings.subscribe();
    let mut metrics_rx = metrics.subscribe();
    wait_watch(&mut findings_rx, |s| s.data.is_some()).await;
    wait_watch(&mut metrics_rx, |s| s.data.is_some()).await;

    // Make sure the SSE subscription is up before publishing.
    let mut status_rx = findings.connection_status();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Connected).await;

    state
        .store
        .put(Category::Findings, &scope, json!({"id": "f-2"}))
        .unwrap();
    state.bus.publish(Envelope {
        scope: scope.clone(),
        event: DeltaEvent {
            category: Category::Findings,
            timestamp_ms: readylayer_core::now_ms(),
            payload: json!({"id": "f-2"}),
        },
    });

    let qs = wait_watch(&mut findings_rx, |s| {
        s.data.as_ref().is_some_and(|p| p.items.len() == 2)
    })
    .await;
    assert!(qs.error.is_none());

    // The metrics snapshot was not re-fetched into something else.
    let metrics_state = metrics.current();
    assert_eq!(metrics_state.data.unwrap().items, vec![json!({"name": "kudos"})]);
}

#[tokio::test]
async fn one_stream_connection_per_scope() {
    let (base, state) = serve().await;
    let client = RealtimeClient::new(&base, StaticCredentials::new("tok")).unwrap();
    let scope = Scope::org("org-1");

    let _findings = client.query(scope.clone(), Category::Findings);
    let _metrics = client.query(scope.clone(), Category::Metrics);
    let connection = client.connection(&scope);

    let mut status_rx = connection.status();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Connected).await;
    // Give any (wrongly) duplicated connection a chance to show up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(state.bus.subscriber_count(), 1);

    // A different scope is a different connection.
    let other = client.connection(&Scope::org("org-2"));
    let mut other_rx = other.status();
    wait_watch(&mut other_rx, |s| *s == ConnectionStatus::Connected).await;
    assert_eq!(state.bus.subscriber_count(), 2);
}

#[tokio::test]
async fn bad_token_surfaces_unauthenticated() {
    let (base, _state) = serve().await;
    let client = RealtimeClient::new(&base, StaticCredentials::new("expired")).unwrap();
    let query = client.query(Scope::org("org-1"), Category::Prs);

    let mut state_rx = query.subscribe();
    let qs = wait_watch(&mut state_rx, |s| s.error.is_some()).await;
    // Specifically Unauthenticated, so the UI can show a sign-in prompt
    // instead of a generic failure.
    assert_eq!(qs.error, Some(SyncError::Unauthenticated));
    assert!(qs.data.is_none());
}

#[tokio::test]
async fn reacquire_after_disconnect_makes_a_fresh_connection() {
    let (base, _state) = serve().await;
    let client = RealtimeClient::new(&base, StaticCredentials::new("tok")).unwrap();
    let scope = Scope::org("org-1");

    let first = client.connection(&scope);
    // A second handle keeps the registry entry upgradeable across the
    // disconnect.
    let second = client.connection(&scope);
    let mut status_rx = first.status();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Connected).await;

    first.disconnect();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Disconnected).await;

    // The shut-down stream must not be handed out again.
    let fresh = client.connection(&scope);
    let mut fresh_rx = fresh.status();
    wait_watch(&mut fresh_rx, |s| *s == ConnectionStatus::Connected).await;
    drop(second);
}

/// Record the instants at which the status enters `Reconnecting`.
async fn reconnect_instants(
    rx: &mut watch::Receiver<ConnectionStatus>,
    n: usize,
) -> Vec<Instant> {
    let mut out = Vec::new();
    let mut last = *rx.borrow_and_update();
    if last == ConnectionStatus::Reconnecting {
        out.push(Instant::now());
    }
    tokio::time::timeout(Duration::from_secs(15), async {
        while out.len() < n {
            rx.changed().await.expect("status channel open");
            let now = *rx.borrow_and_update();
            if now == ConnectionStatus::Reconnecting && last != ConnectionStatus::Reconnecting {
                out.push(Instant::now());
            }
            last = now;
        }
    })
    .await
    .expect("reconnect transitions within deadline");
    out
}

#[tokio::test]
async fn reconnect_spacing_follows_the_backoff_policy() {
    let dead_addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let client =
        RealtimeClient::new(format!("http://{dead_addr}"), StaticCredentials::new("tok"))
            .unwrap();
    let connection = client.connection(&Scope::org("org-1"));
    let mut status_rx = connection.status();

    // Connection refused is near-instant, so the gaps between consecutive
    // reconnecting entries are the backoff delays: ~1s, then ~2s.
    let times = reconnect_instants(&mut status_rx, 3).await;
    let first = times[1] - times[0];
    let second = times[2] - times[1];
    assert!(
        first >= Duration::from_millis(900) && first < Duration::from_millis(1900),
        "first retry gap {first:?}"
    );
    assert!(
        second >= Duration::from_millis(1900) && second < Duration::from_millis(3900),
        "second retry gap {second:?}"
    );
}

#[tokio::test]
async fn backoff_resets_after_a_successful_connection() {
    // Reserve a port, then leave it dead while the client racks up three
    // failed attempts (next delay on the unreset schedule: 8s).
    let addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let client =
        RealtimeClient::new(format!("http://{addr}"), StaticCredentials::new("tok")).unwrap();
    let connection = client.connection(&Scope::org("org-1"));
    let mut status_rx = connection.status();
    reconnect_instants(&mut status_rx, 3).await;

    // Serve one hand-rolled SSE response on the same port.
    let socket = tokio::net::TcpSocket::new_v4().unwrap();
    socket.set_reuseaddr(true).unwrap();
    socket.bind(addr).unwrap();
    let listener = socket.listen(16).unwrap();

    let (mut conn, _) = tokio::time::timeout(Duration::from_secs(15), listener.accept())
        .await
        .expect("client retries against the revived port")
        .unwrap();
    let mut req = [0u8; 1024];
    let _ = conn.read(&mut req).await.unwrap();
    conn.write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n")
        .await
        .unwrap();
    conn.write_all(b"event: connected\r\ndata: {\"timestamp\":1}\r\n\r\n")
        .await
        .unwrap();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Connected).await;

    // Drop the stream server-side: the retry comes on the floor delay, not
    // the pre-success schedule.
    let dropped_at = Instant::now();
    drop(conn);
    let (next, _) = tokio::time::timeout(Duration::from_secs(4), listener.accept())
        .await
        .expect("retry on the floor delay, not the pre-success schedule")
        .unwrap();
    let waited = dropped_at.elapsed();
    assert!(waited >= Duration::from_millis(900), "retried after {waited:?}");
    drop(next);
}

#[tokio::test]
async fn unreachable_server_keeps_reconnecting_until_disconnect() {
    // Grab a port that nothing listens on.
    let dead_addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };

    let client =
        RealtimeClient::new(format!("http://{dead_addr}"), StaticCredentials::new("tok"))
            .unwrap();
    let connection = client.connection(&Scope::org("org-1"));

    // Connecting is too short-lived to observe reliably on a refused port;
    // Reconnecting persists through the whole backoff sleep.
    let mut status_rx = connection.status();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Reconnecting).await;

    // Teardown mid-reconnect: the retry timer is cancelled and the status
    // settles at disconnected.
    connection.disconnect();
    wait_watch(&mut status_rx, |s| *s == ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*status_rx.borrow(), ConnectionStatus::Disconnected);
}
