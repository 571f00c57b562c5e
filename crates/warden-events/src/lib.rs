use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Canonical event topic constants. Keep dot.case and alphabetized.
pub mod topics {
    pub const TOPIC_REQUEST_APPROVED: &str = "request.approved";
    pub const TOPIC_REQUEST_DECIDED: &str = "request.decided";
    pub const TOPIC_REQUEST_DENIED: &str = "request.denied";
    pub const TOPIC_REQUEST_SUBMITTED: &str = "request.submitted";
    pub const TOPIC_WHITELIST_SYNCED: &str = "whitelist.synced";
}

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

/// Broadcast bus carrying decision notifications and sync reports to
/// whatever front-end is attached. Lossy by design: subscribers that
/// lag past the channel capacity miss events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let val =
            serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        let _ = self.tx.send(Envelope {
            time: now,
            kind: kind.to_string(),
            payload: val,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(topics::TOPIC_REQUEST_SUBMITTED, &serde_json::json!({"id": 1}));
        let env = rx.recv().await.expect("envelope");
        assert_eq!(env.kind, "request.submitted");
        assert_eq!(env.payload["id"], 1);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = Bus::new(8);
        bus.publish(topics::TOPIC_WHITELIST_SYNCED, &serde_json::json!({"removed": []}));
    }
}
