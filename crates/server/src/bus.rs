use readylayer_core::{DeltaEvent, Scope};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

/// A delta event plus the scope it was published under; SSE subscribers
/// filter on scope match.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub scope: Scope,
    pub event: DeltaEvent,
}

/// Fan-out of delta events to every open SSE connection. Lagged subscribers
/// lose events, which is safe here: a delta only says "re-fetch", so a miss
/// degrades to the next poll, never to wrong data.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, envelope: Envelope) {
        // Err just means no subscriber is connected right now.
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers, i.e. open SSE connections.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
