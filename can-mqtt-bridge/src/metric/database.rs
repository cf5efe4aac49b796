//! Metric database
//!
//! The in-memory mapping from message identity to metric group and from
//! (group, signal name) to metric. Groups and metrics are pre-declared
//! here; definition-file parsing only enriches records that already exist.

use crate::metric::{Metric, MetricGroup};
use std::collections::BTreeMap;

/// Snapshot of one selected metric, as persisted to configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMetric {
    pub name: String,
    pub group_identity: i64,
    pub group_name: String,
}

/// Database of metric groups keyed by message identity
#[derive(Debug, Clone, Default)]
pub struct MetricDatabase {
    groups: BTreeMap<i64, MetricGroup>,
}

impl MetricDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the group with the given identity
    ///
    /// An existing group keeps its name and state untouched.
    pub fn create_group(&mut self, name: &str, identity: i64) -> &mut MetricGroup {
        self.groups
            .entry(identity)
            .or_insert_with(|| MetricGroup::new(name, identity))
    }

    /// Get or create a metric within an existing group
    ///
    /// Returns None when the group does not exist; metrics are never
    /// created outside a group.
    pub fn create_metric(&mut self, identity: i64, name: &str) -> Option<&mut Metric> {
        let group = self.groups.get_mut(&identity)?;
        let group_name = group.name().to_string();
        Some(
            group
                .metrics
                .entry(name.to_string())
                .or_insert_with(|| Metric::new(name, identity, group_name)),
        )
    }

    pub fn group_by_identity(&self, identity: i64) -> Option<&MetricGroup> {
        self.groups.get(&identity)
    }

    pub fn group_by_identity_mut(&mut self, identity: i64) -> Option<&mut MetricGroup> {
        self.groups.get_mut(&identity)
    }

    pub fn metric_by_group_identity(&self, identity: i64, name: &str) -> Option<&Metric> {
        self.groups.get(&identity).and_then(|g| g.metric(name))
    }

    pub fn metric_by_group_identity_mut(
        &mut self,
        identity: i64,
        name: &str,
    ) -> Option<&mut Metric> {
        self.groups
            .get_mut(&identity)
            .and_then(|g| g.metrics.get_mut(name))
    }

    pub fn groups(&self) -> impl Iterator<Item = &MetricGroup> {
        self.groups.values()
    }

    /// All metrics across all groups
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.groups.values().flat_map(|g| g.metrics())
    }

    pub fn metrics_mut(&mut self) -> impl Iterator<Item = &mut Metric> {
        self.groups.values_mut().flat_map(|g| g.metrics_mut())
    }

    /// Clear the selected flag on every metric
    pub fn clear_selection(&mut self) {
        for metric in self.metrics_mut() {
            metric.set_selected(false);
        }
    }

    /// Snapshot of the currently selected metrics
    pub fn selected_metrics(&self) -> Vec<SelectedMetric> {
        self.metrics()
            .filter(|m| m.is_selected())
            .map(|m| SelectedMetric {
                name: m.name().to_string(),
                group_identity: m.group_identity(),
                group_name: m.group_name().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_group_is_get_or_create() {
        let mut db = MetricDatabase::new();
        db.create_group("EngineData", 291).set_description("first");
        let group = db.create_group("Renamed", 291);
        assert_eq!(group.name(), "EngineData");
        assert_eq!(group.description(), "first");
        assert_eq!(db.groups().count(), 1);
    }

    #[test]
    fn test_create_metric_requires_group() {
        let mut db = MetricDatabase::new();
        assert!(db.create_metric(291, "EngineSpeed").is_none());

        db.create_group("EngineData", 291);
        let metric = db.create_metric(291, "EngineSpeed").unwrap();
        assert_eq!(metric.group_name(), "EngineData");
        assert_eq!(metric.group_identity(), 291);

        // Second call yields the same record
        db.create_metric(291, "EngineSpeed").unwrap().set_selected(true);
        assert_eq!(db.group_by_identity(291).unwrap().metrics().count(), 1);
    }

    #[test]
    fn test_selection_snapshot_and_clear() {
        let mut db = MetricDatabase::new();
        db.create_group("EngineData", 291);
        db.create_metric(291, "EngineSpeed").unwrap().set_selected(true);
        db.create_metric(291, "EngineTemp").unwrap();

        let selected = db.selected_metrics();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "EngineSpeed");
        assert_eq!(selected[0].group_identity, 291);
        assert_eq!(selected[0].group_name, "EngineData");

        db.clear_selection();
        assert!(db.selected_metrics().is_empty());
    }
}
