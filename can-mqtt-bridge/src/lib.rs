//! CAN to MQTT Bridge Library
//!
//! A runtime bridge that translates live CAN bus traffic into
//! engineering-unit metric values and publishes them as JSON messages on
//! MQTT topics, driven by a persisted configuration and DBC
//! signal-definition files.
//!
//! # Architecture
//!
//! - Parses DBC files into a crate-owned network model (`signals`)
//! - Maintains a metric database keyed by CAN message identity (`metric`)
//! - Enriches pre-declared metrics from parsed definitions, inferring
//!   each metric's data type (`catalog`)
//! - Consumes bus frames from a broker subscriber and updates metric
//!   values on a dedicated worker thread (`bus`, `engine`)
//! - Publishes changed groups as JSON payloads through an injected MQTT
//!   wire client (`mqtt`)
//!
//! The bus wire protocol and the MQTT session are narrow contracts
//! (`BusBroker`, `MqttClient`); the engine owns neither.
//!
//! # Example Usage
//!
//! ```no_run
//! use can_mqtt_bridge::CanMqttBridge;
//!
//! let mut bridge = CanMqttBridge::new();
//! bridge.set_config_file("bridge.toml");
//! bridge.load_config().unwrap();
//! bridge.start().unwrap();
//! // ... frames are decoded and published until ...
//! bridge.stop();
//! ```

// Public modules
pub mod bus;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod metric;
pub mod mqtt;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use engine::CanMqttBridge;
pub use metric::{
    DbcFileId, Metric, MetricDatabase, MetricGroup, MetricProperty, MetricType, MetricValue,
    SelectedMetric, SignalRef,
};
pub use mqtt::{MemoryMqttClient, MqttClient, MqttNode, MqttTopic};
pub use signals::{DbcFile, DbcNetwork, DbcSignal};
pub use types::{BridgeError, CanDataFrame, Result, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
