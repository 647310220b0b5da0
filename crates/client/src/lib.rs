//! Client side of the ReadyLayer realtime sync layer.
//!
//! Three pieces, composed by [`RealtimeClient`]:
//! - [`SnapshotFetcher`]: one authenticated request per snapshot page.
//! - [`StreamRegistry`] / [`StreamHandle`]: at most one SSE connection per
//!   scope, reconnecting with capped backoff.
//! - [`RealtimeQuery`]: binds one category's cached snapshot to one scope's
//!   stream, falling back to polling while the stream is down.

pub mod coordinator;
pub mod credentials;
pub mod fetcher;
pub mod sse;
pub mod stream;

pub use coordinator::{QueryConfig, QueryState, RealtimeQuery, SnapshotSource};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use fetcher::{SnapshotFetcher, SnapshotRequest};
pub use stream::{StreamBinding, StreamHandle, StreamRegistry};

use std::sync::Arc;

use readylayer_core::{Category, Scope, SyncError};

/// Facade wiring a shared fetcher and stream registry, the way dashboard
/// views consume the sync layer.
pub struct RealtimeClient<C: CredentialProvider> {
    fetcher: Arc<SnapshotFetcher<C>>,
    registry: StreamRegistry<C>,
    config: QueryConfig,
}

impl<C: CredentialProvider> RealtimeClient<C> {
    pub fn new(base_url: impl Into<String>, credentials: C) -> Result<Self, SyncError> {
        Self::with_config(base_url, credentials, QueryConfig::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        credentials: C,
        config: QueryConfig,
    ) -> Result<Self, SyncError> {
        let base_url = base_url.into();
        let credentials = Arc::new(credentials);
        let fetcher = Arc::new(SnapshotFetcher::new(base_url.clone(), credentials.clone())?);
        let registry = StreamRegistry::new(base_url, credentials)?;
        Ok(Self {
            fetcher,
            registry,
            config,
        })
    }

    /// Start a realtime query for one category under one scope. The query
    /// shares the scope's stream connection with every other query for that
    /// scope.
    pub fn query(&self, scope: Scope, category: Category) -> RealtimeQuery {
        let stream = self.registry.acquire(&scope);
        let request = SnapshotRequest::new(scope, category);
        RealtimeQuery::with_source(
            self.fetcher.clone(),
            request,
            stream.binding(),
            self.config.clone(),
        )
    }

    /// Stream handle for a scope, for connection badges and manual
    /// subscriptions.
    pub fn connection(&self, scope: &Scope) -> StreamHandle {
        self.registry.acquire(scope)
    }
}
