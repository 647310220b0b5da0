//! Shared wire model and pure policy for the ReadyLayer realtime sync layer.

pub mod backoff;
pub mod error;
pub mod events;
pub mod scope;
pub mod snapshot;
pub mod status;
pub mod time;

pub use backoff::*;
pub use error::*;
pub use events::*;
pub use scope::*;
pub use snapshot::*;
pub use status::*;
pub use time::*;
