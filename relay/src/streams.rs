//! Named stream connections.

use relaykit_core::config::MessagingConfig;
use relaykit_core::stream::EventStream;
use std::collections::HashMap;
use std::sync::Arc;

/// Stream connections keyed by the connection name used in configuration.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    connections: HashMap<String, Arc<dyn EventStream>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the connection called `name`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, stream: Arc<dyn EventStream>) -> Self {
        self.connections.insert(name.into(), stream);
        self
    }

    /// Connection called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn EventStream>> {
        self.connections.get(name).map(Arc::clone)
    }

    /// Connection serving the physical topic `topic`, if one is configured and
    /// registered.
    #[must_use]
    pub fn for_topic(&self, messaging: &MessagingConfig, topic: &str) -> Option<Arc<dyn EventStream>> {
        messaging
            .connection_for(topic)
            .and_then(|connection| self.get(&connection.name))
    }

    /// Registered connection names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relaykit_core::config::{StreamConnectionConfig, TopicConfig};
    use relaykit_testing::InMemoryEventStream;

    fn messaging() -> MessagingConfig {
        MessagingConfig {
            connections: vec![StreamConnectionConfig {
                name: "main".to_string(),
                brokers: "localhost:9092".to_string(),
                topics: vec![TopicConfig {
                    name: "Orders".to_string(),
                    value: "orders.v1".to_string(),
                    group_name: "billing".to_string(),
                }],
            }],
            ..MessagingConfig::default()
        }
    }

    #[test]
    fn test_resolves_connection_by_physical_topic() {
        let registry = StreamRegistry::new().with("main", Arc::new(InMemoryEventStream::new()));

        assert!(registry.for_topic(&messaging(), "ORDERS.V1").is_some());
        assert!(registry.for_topic(&messaging(), "payments.v1").is_none());
    }

    #[test]
    fn test_configured_but_unregistered_connection_is_unresolved() {
        let registry = StreamRegistry::new();

        assert!(registry.for_topic(&messaging(), "orders.v1").is_none());
    }
}
