//! Delta stream client: at most one SSE connection per scope, reconnecting
//! with capped backoff, fanning validated events out to any number of
//! coordinators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use readylayer_core::{
    now_ms, reconnect_delay, ConnectionStatus, DeltaEvent, Scope, StreamEvent,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::credentials::CredentialProvider;
use crate::sse::SseParser;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the per-scope connections. Repeated `acquire` calls for one scope
/// share a single connection; the connection closes when the last handle
/// drops.
pub struct StreamRegistry<C> {
    base_url: String,
    credentials: Arc<C>,
    http: reqwest::Client,
    active: Mutex<HashMap<Scope, Weak<StreamShared>>>,
}

impl<C: CredentialProvider> StreamRegistry<C> {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<C>,
    ) -> Result<Self, readylayer_core::SyncError> {
        // No overall timeout: the SSE body is long-lived by design. Only the
        // connect phase is bounded.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| readylayer_core::SyncError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            http,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Handle for the scope's stream, connecting it if no live one exists.
    pub fn acquire(&self, scope: &Scope) -> StreamHandle {
        let mut active = self.active.lock().unwrap();
        active.retain(|_, weak| weak.strong_count() > 0);
        if let Some(shared) = active.get(scope).and_then(Weak::upgrade) {
            // An explicit disconnect() shuts the stream down for every
            // surviving handle; only a fresh acquire after that gets a new
            // connection, so a dead entry must not be reused.
            if !*shared.shutdown_tx.borrow() {
                return StreamHandle { shared };
            }
        }

        let shared = StreamShared::connect(
            self.http.clone(),
            self.base_url.clone(),
            self.credentials.clone(),
            scope.clone(),
        );
        active.insert(scope.clone(), Arc::downgrade(&shared));
        StreamHandle { shared }
    }
}

/// Reference-counted handle to one scope's stream. Cloning shares the
/// connection; dropping the last clone tears it down.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    pub fn scope(&self) -> &Scope {
        &self.shared.scope
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Arrival instant of the most recent stream frame, heartbeats included.
    /// Liveness display only.
    pub fn last_event_ms(&self) -> watch::Receiver<Option<i64>> {
        self.shared.last_event_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<DeltaEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Explicit teardown for every clone of this handle: closes the
    /// connection and cancels any pending retry timer.
    pub fn disconnect(&self) {
        let _ = self.shared.shutdown_tx.send(true);
    }

    /// Channel bundle for a coordinator. Holds a handle clone so the
    /// connection outlives the registry lookup.
    pub fn binding(&self) -> StreamBinding {
        StreamBinding {
            status: self.status(),
            last_event_ms: self.last_event_ms(),
            events: self.events(),
            _handle: Some(self.clone()),
        }
    }
}

/// What a coordinator needs from a stream: status, liveness timestamp and
/// the event feed. Tests build one from raw channels to script the stream.
pub struct StreamBinding {
    pub status: watch::Receiver<ConnectionStatus>,
    pub last_event_ms: watch::Receiver<Option<i64>>,
    pub events: broadcast::Receiver<DeltaEvent>,
    _handle: Option<StreamHandle>,
}

impl StreamBinding {
    pub fn new(
        status: watch::Receiver<ConnectionStatus>,
        last_event_ms: watch::Receiver<Option<i64>>,
        events: broadcast::Receiver<DeltaEvent>,
    ) -> Self {
        Self {
            status,
            last_event_ms,
            events,
            _handle: None,
        }
    }
}

struct StreamShared {
    scope: Scope,
    status_tx: watch::Sender<ConnectionStatus>,
    last_event_tx: watch::Sender<Option<i64>>,
    events_tx: broadcast::Sender<DeltaEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl Drop for StreamShared {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl StreamShared {
    fn connect<C: CredentialProvider>(
        http: reqwest::Client,
        base_url: String,
        credentials: Arc<C>,
        scope: Scope,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (last_event_tx, _) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Self {
            scope: scope.clone(),
            status_tx: status_tx.clone(),
            last_event_tx: last_event_tx.clone(),
            events_tx: events_tx.clone(),
            shutdown_tx,
        });

        // The task holds channel clones, not the Arc, so the last handle
        // drop actually fires Drop and stops the task.
        tokio::spawn(run_connection(
            http,
            base_url,
            credentials,
            scope,
            status_tx,
            last_event_tx,
            events_tx,
            shutdown_rx,
        ));

        shared
    }
}

enum ReadEnd {
    Shutdown,
    Eof,
    Transport(String),
}

#[allow(clippy::too_many_arguments)]
async fn run_connection<C: CredentialProvider>(
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<C>,
    scope: Scope,
    status_tx: watch::Sender<ConnectionStatus>,
    last_event_tx: watch::Sender<Option<i64>>,
    events_tx: broadcast::Sender<DeltaEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        status_tx.send_replace(ConnectionStatus::Connecting);

        let opened = tokio::select! {
            _ = shutdown_rx.changed() => break,
            r = open_stream(&http, &base_url, credentials.as_ref(), &scope) => r,
        };

        match opened {
            Ok(resp) => {
                info!(org = %scope.organization_id, "delta stream connected");
                status_tx.send_replace(ConnectionStatus::Connected);
                attempt = 0;
                match read_stream(resp, &last_event_tx, &events_tx, &mut shutdown_rx).await {
                    ReadEnd::Shutdown => break,
                    ReadEnd::Eof => warn!(org = %scope.organization_id, "delta stream closed by server"),
                    ReadEnd::Transport(e) => {
                        warn!(org = %scope.organization_id, "delta stream read failed: {e}")
                    }
                }
            }
            Err(e) => warn!(org = %scope.organization_id, "delta stream connect failed: {e}"),
        }

        status_tx.send_replace(ConnectionStatus::Error);
        status_tx.send_replace(ConnectionStatus::Reconnecting);

        let delay = reconnect_delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(org = %scope.organization_id, ?delay, "scheduling stream reconnect");
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status_tx.send_replace(ConnectionStatus::Disconnected);
    debug!(org = %scope.organization_id, "delta stream torn down");
}

async fn open_stream<C: CredentialProvider>(
    http: &reqwest::Client,
    base_url: &str,
    credentials: &C,
    scope: &Scope,
) -> Result<reqwest::Response, String> {
    let token = credentials.bearer_token().map_err(|e| e.to_string())?;
    let url = format!("{}/v1/orgs/{}/events", base_url, scope.organization_id);
    let mut builder = http
        .get(&url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    if let Some(repo) = &scope.repository_id {
        builder = builder.query(&[("repositoryId", repo.as_str())]);
    }
    let resp = builder.send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("server returned {}", resp.status()));
    }
    Ok(resp)
}

async fn read_stream(
    mut resp: reqwest::Response,
    last_event_tx: &watch::Sender<Option<i64>>,
    events_tx: &broadcast::Sender<DeltaEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> ReadEnd {
    let mut parser = SseParser::new();
    loop {
        let chunk = tokio::select! {
            _ = shutdown_rx.changed() => return ReadEnd::Shutdown,
            c = resp.chunk() => c,
        };
        let bytes = match chunk {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return ReadEnd::Eof,
            Err(e) => return ReadEnd::Transport(e.to_string()),
        };
        for frame in parser.push(&bytes) {
            last_event_tx.send_replace(Some(now_ms()));
            match StreamEvent::from_sse(&frame.event, &frame.data) {
                // Dispatch never blocks: broadcast::send is synchronous and
                // subscribers do their re-fetch I/O on their own tasks.
                Some(StreamEvent::Delta(ev)) => {
                    let _ = events_tx.send(ev);
                }
                Some(_) => {} // connected/heartbeat: liveness only
                None => {
                    debug!(event = %frame.event, "dropping malformed stream event");
                }
            }
        }
    }
}
