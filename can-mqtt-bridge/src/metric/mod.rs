//! Metric model
//!
//! Published-value records and their grouping by CAN message identity.
//! Group and metric back-references into signal-definition data are
//! handles (arena index plus lookup keys), never owning references.

pub mod database;

pub use database::{MetricDatabase, SelectedMetric};

use serde::Serialize;
use std::collections::BTreeMap;

/// Arena index of a parsed signal-definition file
pub type DbcFileId = usize;

/// Handle to a specific signal definition feeding a metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRef {
    /// Arena index of the owning definition file
    pub dbc_file: DbcFileId,
    /// Message identity within that file's network
    pub message: u32,
    /// Signal name within the message
    pub signal: String,
}

/// Data type of a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricType {
    #[default]
    Unknown,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Text,
}

impl MetricType {
    /// True for the signed integer family
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            MetricType::Int8 | MetricType::Int16 | MetricType::Int32 | MetricType::Int64
        )
    }

    /// True for the unsigned integer family
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            MetricType::UInt8 | MetricType::UInt16 | MetricType::UInt32 | MetricType::UInt64
        )
    }

    /// True for the floating-point family
    pub fn is_floating(&self) -> bool {
        matches!(self, MetricType::Float | MetricType::Double)
    }
}

/// Current value of a metric
///
/// Serializes as the plain scalar, so JSON payloads carry `42`, `3.5`,
/// `true` or `"Off"` rather than a tagged object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Unsigned(u64),
    Double(f64),
    Boolean(bool),
    Text(String),
}

impl Default for MetricValue {
    fn default() -> Self {
        MetricValue::Text(String::new())
    }
}

/// A named string property attached to a metric (bits, enumerate, min, max)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricProperty {
    pub name: String,
    pub value: String,
}

impl MetricProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A published-value record fed by one CAN signal
#[derive(Debug, Clone, Default)]
pub struct Metric {
    name: String,
    group_identity: i64,
    group_name: String,
    description: String,
    unit: String,
    data_type: MetricType,
    properties: BTreeMap<String, MetricProperty>,
    value: MetricValue,
    valid: bool,
    updated: bool,
    selected: bool,
    signal: Option<SignalRef>,
}

impl Metric {
    pub(crate) fn new(name: impl Into<String>, group_identity: i64, group_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_identity,
            group_name: group_name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the owning group (CAN message identity)
    pub fn group_identity(&self) -> i64 {
        self.group_identity
    }

    /// Name of the owning group (CAN message name)
    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
    }

    pub fn data_type(&self) -> MetricType {
        self.data_type
    }

    pub fn set_data_type(&mut self, data_type: MetricType) {
        self.data_type = data_type;
    }

    /// Add or replace a property (idempotent by property name)
    pub fn add_property(&mut self, property: MetricProperty) {
        self.properties.insert(property.name.clone(), property);
    }

    pub fn property(&self, name: &str) -> Option<&MetricProperty> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &MetricProperty> {
        self.properties.values()
    }

    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    /// Store a new value, marking the metric updated if it changed
    pub fn set_value(&mut self, value: MetricValue) {
        if self.value != value {
            self.value = value;
            self.updated = true;
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// True if the value changed since the last publish
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub(crate) fn clear_updated(&mut self) {
        self.updated = false;
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// Signal definition feeding this metric, set once (first writer wins)
    pub fn signal(&self) -> Option<&SignalRef> {
        self.signal.as_ref()
    }

    pub(crate) fn set_signal(&mut self, signal: SignalRef) {
        if self.signal.is_none() {
            self.signal = Some(signal);
        }
    }
}

/// One group per CAN message identity known to the metric database
#[derive(Debug, Clone)]
pub struct MetricGroup {
    identity: i64,
    name: String,
    description: String,
    dbc_file: Option<DbcFileId>,
    pub(crate) metrics: BTreeMap<String, Metric>,
}

impl MetricGroup {
    pub(crate) fn new(name: impl Into<String>, identity: i64) -> Self {
        Self {
            identity,
            name: name.into(),
            description: String::new(),
            dbc_file: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> i64 {
        self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Definition file that first described this identity
    pub fn dbc_file(&self) -> Option<DbcFileId> {
        self.dbc_file
    }

    pub(crate) fn set_dbc_file(&mut self, file: DbcFileId) {
        if self.dbc_file.is_none() {
            self.dbc_file = Some(file);
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    pub fn metrics_mut(&mut self) -> impl Iterator<Item = &mut Metric> {
        self.metrics.values_mut()
    }
}
