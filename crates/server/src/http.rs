use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use readylayer_core::{
    now_ms, Category, DeltaEvent, ErrorBody, Pagination, Scope, SnapshotPage, StreamEvent,
    DEFAULT_SNAPSHOT_LIMIT, MAX_SNAPSHOT_LIMIT,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthRegistry;
use crate::bus::{Envelope, EventBus};
use crate::store::DashboardStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DashboardStore>,
    pub bus: EventBus,
    pub auth: AuthRegistry,
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn DashboardStore>, auth: AuthRegistry, heartbeat: Duration) -> Self {
        Self {
            store,
            bus: EventBus::new(),
            auth,
            heartbeat,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/snapshots/{category}", get(get_snapshot))
        .route(
            "/v1/orgs/{org_id}/events",
            get(subscribe_events).post(publish_event),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<SnapshotPage>, ApiError> {
    let category = Category::from_str_opt(&category)
        .ok_or_else(|| ApiError::not_found(format!("unknown category {category:?}")))?;

    let organization_id = params
        .get("organizationId")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation("organizationId is required"))?;
    state.auth.authorize(&headers, organization_id)?;

    let scope = match params.get("repositoryId").filter(|v| !v.is_empty()) {
        Some(repo) => Scope::repo(organization_id, repo),
        None => Scope::org(organization_id),
    };
    let limit = parse_number::<u32>(&params, "limit")?
        .unwrap_or(DEFAULT_SNAPSHOT_LIMIT)
        .min(MAX_SNAPSHOT_LIMIT);
    let offset = parse_number::<u64>(&params, "offset")?.unwrap_or(0);

    // Category-specific filter params are accepted and left to the store's
    // discretion; the in-memory store ignores them.
    let (items, total) = state
        .store
        .list(category, &scope, limit, offset)
        .map_err(ApiError::internal)?;

    let has_more = offset + (items.len() as u64) < total;
    Ok(Json(SnapshotPage {
        items,
        pagination: Pagination {
            total,
            limit,
            offset,
            has_more,
        },
    }))
}

fn parse_number<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ApiError> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ApiError::validation(format!("{key} must be a non-negative integer"))),
    }
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    #[serde(rename = "repositoryId")]
    repository_id: Option<String>,
}

struct SseSub {
    scope: Scope,
    rx: broadcast::Receiver<Envelope>,
    heartbeat: Interval,
    first: bool,
}

async fn subscribe_events(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Query(params): Query<EventsParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.authorize(&headers, &org_id)?;

    let scope = match params.repository_id {
        Some(repo) => Scope::repo(&org_id, repo),
        None => Scope::org(&org_id),
    };
    let conn_id = Uuid::new_v4();
    info!(%conn_id, org = %org_id, "delta stream subscriber connected");

    let sub = SseSub {
        scope,
        rx: state.bus.subscribe(),
        heartbeat: interval_at(Instant::now() + state.heartbeat, state.heartbeat),
        first: true,
    };

    let stream = futures::stream::unfold(sub, |mut sub| async move {
        if sub.first {
            sub.first = false;
            let ev = sse_event(&StreamEvent::Connected {
                timestamp_ms: now_ms(),
            });
            return Some((Ok::<_, Infallible>(ev), sub));
        }
        loop {
            tokio::select! {
                _ = sub.heartbeat.tick() => {
                    let ev = sse_event(&StreamEvent::Heartbeat { timestamp_ms: now_ms() });
                    return Some((Ok(ev), sub));
                }
                recv = sub.rx.recv() => match recv {
                    Ok(env) if sub.scope.accepts(&env.scope) => {
                        let ev = sse_event(&StreamEvent::Delta(env.event));
                        return Some((Ok(ev), sub));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "sse subscriber lagged behind the event bus");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    });

    Ok(Sse::new(stream))
}

fn sse_event(ev: &StreamEvent) -> Event {
    let (name, data) = ev.to_sse_parts();
    Event::default().event(name).data(data)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishBody {
    #[serde(rename = "type")]
    kind: String,
    timestamp: Option<i64>,
    payload: Option<Value>,
    repository_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    ok: bool,
    event_id: String,
}

/// Producer edge: the review pipeline lands a change, the dashboards get a
/// delta. The payload row is appended to the store so snapshot re-fetches
/// observe the change the delta announced.
async fn publish_event(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PublishBody>,
) -> Result<Json<PublishResponse>, ApiError> {
    state.auth.authorize(&headers, &org_id)?;

    let category = Category::from_delta_event_name(&body.kind)
        .ok_or_else(|| ApiError::validation(format!("unknown event type {:?}", body.kind)))?;
    let scope = match body.repository_id {
        Some(repo) => Scope::repo(&org_id, repo),
        None => Scope::org(&org_id),
    };
    let payload = body.payload.unwrap_or(Value::Null);

    if !payload.is_null() {
        state
            .store
            .put(category, &scope, payload.clone())
            .map_err(ApiError::internal)?;
    }

    let event = DeltaEvent {
        category,
        timestamp_ms: body.timestamp.unwrap_or_else(now_ms),
        payload,
    };
    state.bus.publish(Envelope { scope, event });

    Ok(Json(PublishResponse {
        ok: true,
        event_id: ulid::Ulid::new().to_string(),
    }))
}

/// Uniform wire error: `{"error": {"code", "message"}}` with a matching
/// status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthenticated",
            message: "missing or unknown bearer token".into(),
        }
    }

    pub fn forbidden(organization_id: &str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "forbidden",
            message: format!("no access to organization {organization_id}"),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation",
            message: message.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = Json(ErrorBody::new(self.code, self.message));
        (self.status, body).into_response()
    }
}
