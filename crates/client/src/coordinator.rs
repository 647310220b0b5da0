//! Realtime query coordinator: binds one category's snapshot cache to one
//! scope's delta stream, choosing between push-driven invalidation and timed
//! polling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use readylayer_core::{now_ms, ConnectionStatus, SnapshotPage, SyncError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::fetcher::{SnapshotFetcher, SnapshotRequest};
use crate::credentials::CredentialProvider;
use crate::stream::StreamBinding;

/// Anything that can produce a snapshot page. The production implementation
/// is [`SnapshotFetcher`]; tests drive the coordinator with scripted fakes.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(
        &self,
        req: &SnapshotRequest,
    ) -> impl Future<Output = Result<SnapshotPage, SyncError>> + Send;
}

impl<C: CredentialProvider> SnapshotSource for SnapshotFetcher<C> {
    fn fetch(
        &self,
        req: &SnapshotRequest,
    ) -> impl Future<Output = Result<SnapshotPage, SyncError>> + Send {
        SnapshotFetcher::fetch(self, req)
    }
}

#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// Re-fetch period while the stream is not live.
    pub poll_interval: Duration,
    /// How long a successful fetch satisfies `refresh()` without a network
    /// call. Invalidations bypass the window.
    pub stale_after: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// What consumers render: last good data, in-flight flag, last error. A
/// failed refresh never clears `data`.
#[derive(Clone, Debug, Default)]
pub struct QueryState {
    pub data: Option<SnapshotPage>,
    pub is_loading: bool,
    pub error: Option<SyncError>,
}

enum Command {
    Refresh,
    SetPage { limit: u32, offset: u64 },
    SetFilters(Vec<(String, String)>),
}

/// One category bound to one scope. Dropping the query (or calling
/// [`RealtimeQuery::detach`]) stops the driver synchronously: no further
/// fetches, poll timers die with the task.
pub struct RealtimeQuery {
    state_rx: watch::Receiver<QueryState>,
    status_rx: watch::Receiver<ConnectionStatus>,
    last_event_rx: watch::Receiver<Option<i64>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: watch::Sender<bool>,
}

impl RealtimeQuery {
    pub fn with_source<S: SnapshotSource>(
        source: Arc<S>,
        request: SnapshotRequest,
        stream: StreamBinding,
        config: QueryConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(QueryState {
            data: None,
            is_loading: true,
            error: None,
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status_rx = stream.status.clone();
        let last_event_rx = stream.last_event_ms.clone();

        tokio::spawn(drive(
            source,
            request,
            stream,
            config,
            state_tx,
            cmd_rx,
            shutdown_rx,
        ));

        Self {
            state_rx,
            status_rx,
            last_event_rx,
            cmd_tx,
            shutdown_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> QueryState {
        self.state_rx.borrow().clone()
    }

    /// Connection status of the underlying scope stream, for badges.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn last_event_ms(&self) -> watch::Receiver<Option<i64>> {
        self.last_event_rx.clone()
    }

    /// Consumer-initiated refresh. Served from cache inside the staleness
    /// window; also the only thing that resumes fetching after an
    /// `Unauthenticated` failure.
    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(Command::Refresh);
    }

    /// Update pagination; the next fetch uses the new values.
    pub fn set_page(&self, limit: u32, offset: u64) {
        let _ = self.cmd_tx.send(Command::SetPage { limit, offset });
    }

    /// Replace category-specific filters; forces a re-fetch.
    pub fn set_filters(&self, filters: Vec<(String, String)>) {
        let _ = self.cmd_tx.send(Command::SetFilters(filters));
    }

    pub fn detach(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for RealtimeQuery {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn start_fetch<S: SnapshotSource>(
    source: &Arc<S>,
    request: &SnapshotRequest,
    state_tx: &watch::Sender<QueryState>,
) -> JoinHandle<Result<SnapshotPage, SyncError>> {
    state_tx.send_modify(|s| s.is_loading = true);
    let source = source.clone();
    // Snapshot the parameters now: an in-flight fetch never sees later edits.
    let request = request.clone();
    tokio::spawn(async move { source.fetch(&request).await })
}

async fn drive<S: SnapshotSource>(
    source: Arc<S>,
    mut request: SnapshotRequest,
    mut stream: StreamBinding,
    config: QueryConfig,
    state_tx: watch::Sender<QueryState>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let category = request.category;
    let mut in_flight: Option<JoinHandle<Result<SnapshotPage, SyncError>>> =
        Some(start_fetch(&source, &request, &state_tx));
    let mut pending = false;
    let mut events_closed = false;
    let mut status_closed = false;
    let mut last_success_ms: Option<i64> = None;
    // After an Unauthenticated failure automatic re-fetching stops; a new
    // token won't appear by itself, and hammering the endpoint just makes
    // noise. refresh() re-arms.
    let mut auth_halted = false;

    let mut polling = !stream.status.borrow().is_live();
    let mut poll = interval_at(Instant::now() + config.poll_interval, config.poll_interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,

            // The precondition guards the unwrap: this branch is only
            // enabled while a fetch is in flight.
            res = async { in_flight.as_mut().expect("in-flight fetch").await }, if in_flight.is_some() => {
                in_flight = None;
                match res {
                    Ok(Ok(page)) => {
                        last_success_ms = Some(now_ms());
                        auth_halted = false;
                        state_tx.send_modify(|s| {
                            s.data = Some(page);
                            s.is_loading = false;
                            s.error = None;
                        });
                    }
                    Ok(Err(e)) => {
                        warn!(%category, error = %e, "snapshot fetch failed");
                        auth_halted = matches!(e, SyncError::Unauthenticated);
                        // Keep the last good snapshot visible next to the
                        // error (stale-while-revalidate-on-error).
                        state_tx.send_modify(|s| {
                            s.is_loading = false;
                            s.error = Some(e);
                        });
                    }
                    Err(join_err) => {
                        warn!(%category, "snapshot fetch task failed: {join_err}");
                        state_tx.send_modify(|s| {
                            s.is_loading = false;
                            s.error = Some(SyncError::Network("fetch task failed".into()));
                        });
                    }
                }
                if pending && !auth_halted {
                    pending = false;
                    in_flight = Some(start_fetch(&source, &request, &state_tx));
                } else {
                    pending = false;
                }
            }

            ev = stream.events.recv(), if !events_closed => {
                match ev {
                    Ok(ev) if ev.category == category => {
                        debug!(%category, "delta event; invalidating snapshot");
                        invalidate(&source, &request, &state_tx, &mut in_flight, &mut pending, auth_halted);
                    }
                    Ok(_) => {} // other categories are independent
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Missed events may have included ours; re-fetch.
                        debug!(%category, missed, "event stream lagged; invalidating");
                        invalidate(&source, &request, &state_tx, &mut in_flight, &mut pending, auth_halted);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events_closed = true;
                    }
                }
            }

            changed = stream.status.changed(), if !status_closed => {
                if changed.is_err() {
                    // Stream side gone entirely; arm polling once and stop
                    // selecting on the closed channel.
                    status_closed = true;
                    if !polling {
                        polling = true;
                        poll = interval_at(Instant::now() + config.poll_interval, config.poll_interval);
                    }
                    continue;
                }
                let live = stream.status.borrow_and_update().is_live();
                if live {
                    polling = false;
                } else if !polling {
                    polling = true;
                    // Fresh timer so the first poll fires one period from
                    // the status change, not immediately.
                    poll = interval_at(Instant::now() + config.poll_interval, config.poll_interval);
                }
            }

            _ = poll.tick(), if polling => {
                if !auth_halted {
                    debug!(%category, "poll fallback re-fetch");
                    invalidate(&source, &request, &state_tx, &mut in_flight, &mut pending, auth_halted);
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Refresh) => {
                        auth_halted = false;
                        let fresh = last_success_ms
                            .is_some_and(|t| now_ms() - t < config.stale_after.as_millis() as i64);
                        if !fresh || pending {
                            invalidate(&source, &request, &state_tx, &mut in_flight, &mut pending, false);
                        }
                    }
                    Some(Command::SetPage { limit, offset }) => {
                        request.limit = limit;
                        request.offset = offset;
                        invalidate(&source, &request, &state_tx, &mut in_flight, &mut pending, auth_halted);
                    }
                    Some(Command::SetFilters(filters)) => {
                        request.filters = filters;
                        invalidate(&source, &request, &state_tx, &mut in_flight, &mut pending, auth_halted);
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(task) = in_flight {
        task.abort();
    }
    debug!(%category, "realtime query detached");
}

/// Coalescing invalidation: at most one fetch in flight; extra invalidations
/// collapse into a single queued follow-up.
fn invalidate<S: SnapshotSource>(
    source: &Arc<S>,
    request: &SnapshotRequest,
    state_tx: &watch::Sender<QueryState>,
    in_flight: &mut Option<JoinHandle<Result<SnapshotPage, SyncError>>>,
    pending: &mut bool,
    auth_halted: bool,
) {
    if auth_halted {
        return;
    }
    if in_flight.is_some() {
        *pending = true;
    } else {
        *in_flight = Some(start_fetch(source, request, state_tx));
    }
}
