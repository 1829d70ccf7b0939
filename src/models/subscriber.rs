use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recipient interested in one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Subscriber {
    pub subscriber_id: String,
    pub identifier: String,
}

/// Optional secondary webhook-style channel, at most one per subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PushChannel {
    pub subscriber_id: String,
    pub secret: String,
}

impl PushChannel {
    /// Topic name `<prefix>_<subscriberId>_<secret>`.
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}_{}_{}", prefix, self.subscriber_id, self.secret)
    }
}
