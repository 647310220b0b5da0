use serde::{Deserialize, Serialize};

/// Lifecycle of one delta stream connection. Exactly one value at any
/// instant per stream client; transitions are driven only by transport
/// lifecycle events and explicit connect/disconnect calls.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    /// Live means the push path can be trusted to deliver (or is about to);
    /// polling fallback runs exactly while this is false.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Connecting)
    }
}
