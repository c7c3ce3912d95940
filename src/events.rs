use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

/// Channels published on the event bus
pub mod channel {
    pub const FLEET_PROVISION: &str = "fleet:provision";
    pub const FLEET_STATUS: &str = "fleet:status";
    pub const FLEET_UPDATED: &str = "fleet:updated";
    pub const LEDGER_RECORDED: &str = "ledger:recorded";
    pub const LEDGER_STATUS: &str = "ledger:status";
    pub const COLLABORATION_MESSAGE: &str = "collaboration:message";
}

/// A single message on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: &'static str,
    pub payload: JsonValue,
}

/// In-process pub/sub for state changes
///
/// Publishers call [`EventBus::publish`] only after the corresponding write has
/// been committed. Subscribers that fall behind lose the oldest messages.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    /// Publish a payload; returns the number of subscribers that received it
    pub fn publish<T: Serialize>(&self, channel: &'static str, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize {} payload: {}", channel, e);
                return 0;
            }
        };

        // A send error only means nobody is listening
        let delivered = self
            .tx
            .send(BusMessage { channel, payload })
            .unwrap_or(0);
        tracing::debug!("Published {} to {} subscriber(s)", channel, delivered);
        delivered
    }
}
