use std::sync::Arc;
use std::time::Duration;

use readylayer_core::{
    Category, ErrorBody, Scope, SnapshotPage, SyncError, DEFAULT_SNAPSHOT_LIMIT,
};
use reqwest::StatusCode;
use tracing::debug;

use crate::credentials::CredentialProvider;

/// Hard bound on one snapshot request, including connect and body read.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for one snapshot fetch. The coordinator clones the current
/// value at the moment a fetch fires, so in-flight requests never see later
/// edits.
#[derive(Clone, Debug)]
pub struct SnapshotRequest {
    pub scope: Scope,
    pub category: Category,
    pub limit: u32,
    pub offset: u64,
    /// Category-specific filters, passed through as query parameters.
    pub filters: Vec<(String, String)>,
}

impl SnapshotRequest {
    pub fn new(scope: Scope, category: Category) -> Self {
        Self {
            scope,
            category,
            limit: DEFAULT_SNAPSHOT_LIMIT,
            offset: 0,
            filters: Vec::new(),
        }
    }
}

/// Pulls one validated snapshot page per call. No internal retries; retry
/// policy lives in the coordinator.
pub struct SnapshotFetcher<C> {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<C>,
}

impl<C: CredentialProvider> SnapshotFetcher<C> {
    pub fn new(base_url: impl Into<String>, credentials: Arc<C>) -> Result<Self, SyncError> {
        Self::with_timeout(base_url, credentials, FETCH_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        credentials: Arc<C>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub async fn fetch(&self, req: &SnapshotRequest) -> Result<SnapshotPage, SyncError> {
        if !req.scope.is_valid() {
            return Err(SyncError::Validation("organizationId is required".into()));
        }
        let token = self.credentials.bearer_token()?;

        let url = format!("{}/v1/snapshots/{}", self.base_url, req.category.as_str());
        let mut builder = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("organizationId", req.scope.organization_id.as_str())])
            .query(&[("limit", req.limit)])
            .query(&[("offset", req.offset)]);
        if let Some(repo) = &req.scope.repository_id {
            builder = builder.query(&[("repositoryId", repo.as_str())]);
        }
        if !req.filters.is_empty() {
            builder = builder.query(&req.filters);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Network("request timed out".into())
            } else {
                SyncError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            // Schema check: a 2xx body that does not decode is surfaced as
            // Validation, never handed over as silently-wrong data.
            return resp
                .json::<SnapshotPage>()
                .await
                .map_err(|e| SyncError::Validation(format!("malformed snapshot body: {e}")));
        }

        let body = resp.json::<ErrorBody>().await.ok();
        if let Some(b) = &body {
            debug!(
                code = %b.error.code,
                message = %b.error.message,
                category = %req.category,
                "snapshot fetch rejected"
            );
        }
        Err(classify_status(status, body))
    }
}

fn classify_status(status: StatusCode, body: Option<ErrorBody>) -> SyncError {
    let message = body
        .map(|b| b.error.message)
        .unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Unauthenticated,
        StatusCode::FORBIDDEN => SyncError::Forbidden,
        StatusCode::NOT_FOUND => SyncError::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Validation(message)
        }
        _ => SyncError::Network(format!("server returned {status}: {message}")),
    }
}
