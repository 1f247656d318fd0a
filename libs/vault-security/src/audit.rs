//! Append-only audit trail of authorization decisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::identity::UserId;

pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Resource type, or `<type>:<id>` when a single resource is involved.
    pub resource: String,
    pub granted: bool,
    pub reason: String,
    pub actor: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(resource: impl Into<String>, granted: bool, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            granted,
            reason: reason.into(),
            actor: None,
            timestamp: OffsetDateTime::now_utc(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    #[must_use]
    pub fn meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }
}

/// Receives every authorization decision.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Fans audit events out to any number of subscribers.
///
/// Events published while nobody listens are dropped; slow subscribers skip
/// what they missed.
#[derive(Debug, Clone)]
pub struct BroadcastAuditTrail {
    tx: broadcast::Sender<AuditEvent>,
}

impl Default for BroadcastAuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl BroadcastAuditTrail {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`; lagged gaps are logged and skipped.
    #[must_use]
    pub fn subscribe_stream(&self) -> impl Stream<Item = AuditEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|res| match res {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!(skipped = n, "Audit subscriber lagged");
                None
            }
        })
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl AuditSink for BroadcastAuditTrail {
    fn record(&self, event: AuditEvent) {
        debug!(
            resource = %event.resource,
            granted = event.granted,
            reason = %event.reason,
            "audit"
        );
        // No subscribers is not an error.
        _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_receives_published_events() {
        let trail = BroadcastAuditTrail::new(8);
        let mut stream = Box::pin(trail.subscribe_stream());
        trail.record(AuditEvent::new("note:n1", true, "ok:n1").meta("operation", "read"));

        let event = stream.next().await.unwrap();
        assert_eq!(event.resource, "note:n1");
        assert_eq!(event.metadata.get("operation").map(String::as_str), Some("read"));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let trail = BroadcastAuditTrail::default();
        trail.record(AuditEvent::new("note", false, "missing_user"));
        assert_eq!(trail.subscriber_count(), 0);
    }

    #[test]
    fn event_serializes_with_rfc3339_timestamp() {
        let event = AuditEvent::new("note:n1", false, "forbidden:n1").actor(Some(UserId::new("u1")));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["actor"], "u1");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
