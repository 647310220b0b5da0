//! Server side of the ReadyLayer realtime sync layer: per-category snapshot
//! endpoints plus the org-scoped SSE delta stream.

pub mod auth;
pub mod bus;
pub mod http;
pub mod store;

pub use auth::AuthRegistry;
pub use bus::{Envelope, EventBus};
pub use http::{router, ApiError, AppState};
pub use store::{DashboardStore, MemoryStore};
