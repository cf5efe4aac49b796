//! Metric catalog population
//!
//! Walks a parsed DBC network and enriches the pre-declared groups and
//! metrics of the metric database: back-references, descriptions, units
//! and the inferred metric data type. Enrichment is first-writer-wins per
//! group and per metric, so the first definition file to describe a CAN
//! identity keeps it.

use crate::metric::{DbcFileId, Metric, MetricDatabase, MetricProperty, MetricType, SignalRef};
use crate::signals::{DbcFile, DbcSignal, SignalDataType};

/// Enrich the metric database from one parsed definition file
///
/// Messages without a matching group and signals without a matching metric
/// are skipped; the database only tracks records it was told to expect.
/// Safe to run repeatedly for the same file.
pub fn populate_from_dbc(db: &mut MetricDatabase, file: &DbcFile, file_id: DbcFileId) {
    let Some(network) = file.network() else {
        log::warn!(
            "Definition file has no parsed network: {}",
            file.filename()
        );
        return;
    };

    for (ident, message) in network.messages() {
        let identity = *ident as i64;
        let Some(group) = db.group_by_identity_mut(identity) else {
            continue;
        };

        if group.dbc_file().is_none() {
            group.set_dbc_file(file_id);
            group.set_description(message.comment.clone());
        }

        for (signal_name, signal) in &message.signals {
            let Some(metric) = db.metric_by_group_identity_mut(identity, signal_name) else {
                continue;
            };
            if metric.signal().is_some() {
                continue;
            }
            metric.set_signal(SignalRef {
                dbc_file: file_id,
                message: *ident,
                signal: signal_name.clone(),
            });
            metric.set_description(signal.comment.clone());
            metric.set_unit(signal.unit.clone());
            infer_data_type(signal, metric);
        }
    }
}

/// Infer and store a metric's data type and properties from its signal
///
/// Deterministic and idempotent: the same signal always yields the same
/// stored type and property set.
pub fn infer_data_type(signal: &DbcSignal, metric: &mut Metric) {
    // Enumerated signals publish the scaled label, not the raw integer.
    if !signal.enum_list.is_empty() {
        metric.set_data_type(MetricType::Text);
        metric.add_property(MetricProperty::new("bits", signal.bit_length.to_string()));
        metric.add_property(MetricProperty::new(
            "enumerate",
            encode_enum_list(signal),
        ));
        attach_range(signal, metric);
        return;
    }

    // The DBC format doesn't define a data type for byte arrays; publish
    // them as text.
    if signal.is_array_value() {
        metric.set_data_type(MetricType::Text);
        attach_range(signal, metric);
        return;
    }

    let no_scale = signal.scale == 1.0 && signal.offset == 0.0;
    let data_type = if no_scale {
        match signal.data_type {
            SignalDataType::Signed => {
                if signal.bit_length <= 8 {
                    MetricType::Int8
                } else if signal.bit_length <= 16 {
                    MetricType::Int16
                } else if signal.bit_length <= 32 {
                    MetricType::Int32
                } else {
                    MetricType::Int64
                }
            }
            SignalDataType::Unsigned => {
                if signal.bit_length <= 1 {
                    MetricType::Boolean
                } else if signal.bit_length <= 8 {
                    MetricType::UInt8
                } else if signal.bit_length <= 16 {
                    MetricType::UInt16
                } else if signal.bit_length <= 32 {
                    MetricType::UInt32
                } else {
                    MetricType::UInt64
                }
            }
            SignalDataType::Float => MetricType::Float,
            SignalDataType::Double => MetricType::Double,
        }
    } else {
        // A scaled value is never guaranteed to stay integral.
        MetricType::Double
    };
    metric.set_data_type(data_type);
    attach_range(signal, metric);
}

/// Encode the enumerated value table as `key:label` pairs separated by `;`
///
/// A literal `;` inside a label is replaced by a space to keep the
/// encoding unambiguous.
fn encode_enum_list(signal: &DbcSignal) -> String {
    let mut encoded = String::new();
    for (key, label) in &signal.enum_list {
        if !encoded.is_empty() {
            encoded.push(';');
        }
        let clean = label.replace(';', " ");
        encoded.push_str(&format!("{}:{}", key, clean));
    }
    encoded
}

fn attach_range(signal: &DbcSignal, metric: &mut Metric) {
    if signal.min < signal.max {
        metric.add_property(MetricProperty::new("min", format!("{}", signal.min)));
        metric.add_property(MetricProperty::new("max", format!("{}", signal.max)));
    }
}
