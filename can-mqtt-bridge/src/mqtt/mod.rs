//! MQTT publish transport
//!
//! The node object carries the broker connection identity and the
//! assembled topics. The wire protocol itself lives behind the
//! [`MqttClient`] trait, injected at construction, so the bridge engine
//! never owns connection or session management.

pub mod topic;

pub use topic::{GroupPayload, MetricKey, MqttTopic};

use crate::types::{BridgeError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Default topic namespace for CAN metric groups
pub const DEFAULT_NAMESPACE: &str = "CanMetrics";

/// Transport kind towards the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportLayer {
    /// Plain TCP
    #[default]
    Tcp,
    /// TLS over TCP
    Tls,
}

/// MQTT protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    V311,
    #[default]
    V5,
}

/// Connection parameters handed to the wire client
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub user_name: String,
    pub password: String,
    pub transport: TransportLayer,
    pub version: ProtocolVersion,
}

/// Wire client contract
///
/// Connection and session management is supplied by the implementation;
/// the bridge only demands connect, publish and disconnect.
pub trait MqttClient: Send {
    fn connect(&mut self, options: &ConnectOptions) -> Result<()>;
    fn publish(&mut self, topic: &str, content_type: &str, payload: &[u8]) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
}

/// A message recorded by the in-memory client
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryClientState {
    connected: bool,
    published: Vec<PublishedMessage>,
}

/// In-memory wire client
///
/// Records every published message. Used by the test suite and by
/// embedded or dry-run deployments; clones share the same state so a
/// handle kept outside the node can inspect what was published.
#[derive(Debug, Clone, Default)]
pub struct MemoryMqttClient {
    state: Arc<Mutex<MemoryClientState>>,
}

impl MemoryMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryClientState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Snapshot of everything published so far
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }
}

impl MqttClient for MemoryMqttClient {
    fn connect(&mut self, options: &ConnectOptions) -> Result<()> {
        log::debug!(
            "Memory MQTT client connected: {}:{}",
            options.host,
            options.port
        );
        self.state().connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, content_type: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(BridgeError::Mqtt("Client is not connected".to_string()));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            content_type: content_type.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.state().connected = false;
        Ok(())
    }
}

/// Node object holding the broker identity and the assembled topics
pub struct MqttNode {
    pub name: String,
    pub description: String,
    pub transport: TransportLayer,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub user_name: String,
    pub password: String,
    pub version: ProtocolVersion,

    in_service: bool,
    connected: bool,
    topics: BTreeMap<String, MqttTopic>,
    client: Box<dyn MqttClient>,
}

impl MqttNode {
    pub fn new(client: Box<dyn MqttClient>) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            transport: TransportLayer::default(),
            host: String::new(),
            port: 0,
            client_id: String::new(),
            user_name: String::new(),
            password: String::new(),
            version: ProtocolVersion::default(),
            in_service: false,
            connected: false,
            topics: BTreeMap::new(),
            client,
        }
    }

    /// Mark the node ready for initialization
    pub fn in_service(&mut self) {
        self.in_service = true;
    }

    pub fn out_of_service(&mut self) {
        self.in_service = false;
    }

    pub fn is_in_service(&self) -> bool {
        self.in_service
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connect the wire client with the configured identity
    pub fn init(&mut self) -> Result<()> {
        if !self.in_service {
            return Err(BridgeError::Mqtt(
                "The node is not in service".to_string(),
            ));
        }
        let options = ConnectOptions {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            user_name: self.user_name.clone(),
            password: self.password.clone(),
            transport: self.transport,
            version: self.version,
        };
        self.client.connect(&options)?;
        self.connected = true;
        Ok(())
    }

    /// Disconnect the wire client
    pub fn exit(&mut self) -> Result<()> {
        if self.connected {
            self.client.disconnect()?;
            self.connected = false;
        }
        Ok(())
    }

    /// Get or create a topic by name; fails on an empty name
    pub fn create_topic(&mut self, name: &str) -> Option<&mut MqttTopic> {
        if name.is_empty() {
            return None;
        }
        Some(
            self.topics
                .entry(name.to_string())
                .or_insert_with(|| MqttTopic::new(name)),
        )
    }

    pub fn topic(&self, name: &str) -> Option<&MqttTopic> {
        self.topics.get(name)
    }

    pub fn topics(&self) -> impl Iterator<Item = &MqttTopic> {
        self.topics.values()
    }

    /// Publish a payload to an assembled topic
    pub fn publish(&mut self, topic_name: &str, payload: &[u8]) -> Result<()> {
        let Some(topic) = self.topics.get(topic_name) else {
            return Err(BridgeError::Mqtt(format!(
                "Unknown topic: {}",
                topic_name
            )));
        };
        if !self.connected {
            return Err(BridgeError::Mqtt("The node is not connected".to_string()));
        }
        let content_type = topic.content_type.clone();
        self.client.publish(topic_name, &content_type, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> (MqttNode, MemoryMqttClient) {
        let client = MemoryMqttClient::new();
        let mut node = MqttNode::new(Box::new(client.clone()));
        node.host = "127.0.0.1".to_string();
        node.port = 1883;
        (node, client)
    }

    #[test]
    fn test_init_requires_in_service() {
        let (mut node, client) = node();
        assert!(node.init().is_err());
        assert!(!client.is_connected());

        node.in_service();
        node.init().unwrap();
        assert!(client.is_connected());

        node.exit().unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_create_topic_rejects_empty_name() {
        let (mut node, _client) = node();
        assert!(node.create_topic("").is_none());
        assert!(node.create_topic("CanMetrics/EngineData").is_some());
        // Same name yields the same topic
        node.create_topic("CanMetrics/EngineData").unwrap();
        assert_eq!(node.topics().count(), 1);
    }

    #[test]
    fn test_publish_requires_known_topic() {
        let (mut node, client) = node();
        node.in_service();
        node.init().unwrap();

        assert!(node.publish("CanMetrics/Nothing", b"{}").is_err());

        node.create_topic("CanMetrics/EngineData").unwrap();
        node.publish("CanMetrics/EngineData", b"{}").unwrap();

        let published = client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "CanMetrics/EngineData");
        assert_eq!(published[0].content_type, "application/json");
    }

    #[test]
    fn test_exit_twice_is_safe() {
        let (mut node, _client) = node();
        node.in_service();
        node.init().unwrap();
        node.exit().unwrap();
        node.exit().unwrap();
    }
}
