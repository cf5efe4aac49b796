//! Topics and group payloads
//!
//! One topic per metric group. Topics reference their metrics by key
//! (group identity plus metric name); the metric records stay owned by
//! the metric database.

use crate::metric::{MetricGroup, MetricValue};
use crate::types::{BridgeError, Result, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;

/// Key of a metric attached to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKey {
    pub group_identity: i64,
    pub name: String,
}

/// A named publish channel grouping one message-identity's metrics
#[derive(Debug, Clone)]
pub struct MqttTopic {
    topic_name: String,
    pub description: String,
    pub content_type: String,
    metrics: Vec<MetricKey>,
}

impl MqttTopic {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            topic_name: name.into(),
            description: String::new(),
            content_type: "application/json".to_string(),
            metrics: Vec::new(),
        }
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Attach a metric to this topic
    pub fn add_metric(&mut self, key: MetricKey) {
        if !self.metrics.contains(&key) {
            self.metrics.push(key);
        }
    }

    pub fn metrics(&self) -> &[MetricKey] {
        &self.metrics
    }
}

/// Derive the topic name of a group: `<namespace>/<group-name-or-identity>`
pub fn topic_name_for_group(namespace: &str, group: &MetricGroup) -> String {
    if group.name().is_empty() {
        format!("{}/{}", namespace, group.identity())
    } else {
        format!("{}/{}", namespace, group.name())
    }
}

/// One metric inside a published group payload
#[derive(Debug, Clone, Serialize)]
pub struct MetricPayload {
    pub value: MetricValue,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub valid: bool,
}

/// JSON payload published for one metric group
#[derive(Debug, Clone, Serialize)]
pub struct GroupPayload {
    pub group: String,
    pub identity: i64,
    pub timestamp: String,
    pub metrics: BTreeMap<String, MetricPayload>,
}

impl GroupPayload {
    /// Snapshot the named metrics of a group
    pub fn from_group(group: &MetricGroup, timestamp: Timestamp) -> Self {
        let metrics = group
            .metrics()
            .filter(|m| !m.name().is_empty())
            .map(|m| {
                (
                    m.name().to_string(),
                    MetricPayload {
                        value: m.value().clone(),
                        unit: m.unit().to_string(),
                        valid: m.is_valid(),
                    },
                )
            })
            .collect();
        Self {
            group: group.name().to_string(),
            identity: group.identity(),
            timestamp: timestamp.to_rfc3339(),
            metrics,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| BridgeError::Mqtt(format!("Failed to encode payload: {}", e)))
    }
}
