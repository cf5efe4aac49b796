//! Bridge engine
//!
//! Owns the lifecycle (idle, starting, running, stopping), the decode
//! worker and the configuration round-trip. Two threads of control exist
//! while running: the owner thread driving `start`/`stop`/config
//! operations and exactly one decode worker. The catalog state is shared
//! behind one mutex; the stop flag is the only lock-free shared state.

use crate::bus::{self, BrokerKind, BusBroker, BusMessage, BusOptions, BusQueue};
use crate::catalog;
use crate::config::{self, BridgeConfigDoc, DbcFileEntry, SelectedItemEntry};
use crate::metric::{MetricDatabase, MetricType, MetricValue};
use crate::mqtt::{
    topic, GroupPayload, MemoryMqttClient, MetricKey, MqttClient, MqttNode, ProtocolVersion,
    TransportLayer, DEFAULT_NAMESPACE,
};
use crate::signals::DbcFile;
use crate::types::{BridgeError, CanDataFrame, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Catalog state shared between the owner thread and the decode worker
#[derive(Default)]
struct CatalogState {
    dbc_files: Vec<DbcFile>,
    metric_db: MetricDatabase,
}

fn lock_state(catalog: &Mutex<CatalogState>) -> MutexGuard<'_, CatalogState> {
    match catalog.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_node(node: &Mutex<MqttNode>) -> MutexGuard<'_, MqttNode> {
    match node.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The CAN to MQTT bridge engine
pub struct CanMqttBridge {
    config_file: String,

    shared_mem_name: String,
    bus_host: String,
    bus_port: u16,

    broker_host: String,
    broker_port: u16,
    transport_layer: TransportLayer,
    broker_client_id: String,
    broker_user: String,
    broker_password: String,

    catalog: Arc<Mutex<CatalogState>>,
    bus_broker: Option<Box<dyn BusBroker>>,
    bus_subscriber: Option<Arc<BusQueue>>,
    mqtt_node: Arc<Mutex<MqttNode>>,
    work_thread: Option<JoinHandle<()>>,
    stop_thread: Arc<AtomicBool>,
}

impl CanMqttBridge {
    /// Create an engine with the in-memory MQTT client
    pub fn new() -> Self {
        Self::with_client(Box::new(MemoryMqttClient::new()))
    }

    /// Create an engine with an injected MQTT wire client
    pub fn with_client(client: Box<dyn MqttClient>) -> Self {
        Self {
            config_file: String::new(),
            shared_mem_name: String::new(),
            bus_host: String::new(),
            bus_port: 0,
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            transport_layer: TransportLayer::default(),
            broker_client_id: String::new(),
            broker_user: String::new(),
            broker_password: String::new(),
            catalog: Arc::new(Mutex::new(CatalogState::default())),
            bus_broker: None,
            bus_subscriber: None,
            mqtt_node: Arc::new(Mutex::new(MqttNode::new(client))),
            work_thread: None,
            stop_thread: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn set_config_file(&mut self, path: impl Into<String>) {
        self.config_file = path.into();
    }

    pub fn shared_mem_name(&self) -> &str {
        &self.shared_mem_name
    }

    pub fn set_shared_mem_name(&mut self, name: impl Into<String>) {
        self.shared_mem_name = name.into();
    }

    pub fn set_bus_address(&mut self, host: impl Into<String>, port: u16) {
        self.bus_host = host.into();
        self.bus_port = port;
    }

    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn set_broker_address(&mut self, host: impl Into<String>, port: u16) {
        self.broker_host = host.into();
        self.broker_port = port;
    }

    pub fn set_broker_client_id(&mut self, client_id: impl Into<String>) {
        self.broker_client_id = client_id.into();
    }

    pub fn set_broker_credentials(
        &mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.broker_user = user.into();
        self.broker_password = password.into();
    }

    /// True while the decode worker is running
    pub fn is_running(&self) -> bool {
        self.work_thread.is_some()
    }

    /// Read access to the metric database
    pub fn with_metrics<R>(&self, f: impl FnOnce(&MetricDatabase) -> R) -> R {
        f(&lock_state(&self.catalog).metric_db)
    }

    /// Write access to the metric database (group and metric declaration)
    pub fn with_metrics_mut<R>(&self, f: impl FnOnce(&mut MetricDatabase) -> R) -> R {
        f(&mut lock_state(&self.catalog).metric_db)
    }

    /// Parse a definition file, add it to the arena and enrich the catalog
    pub fn add_dbc_file(&mut self, path: impl Into<String>) -> Result<()> {
        let mut file = DbcFile::new(path);
        file.parse_file()?;
        let mut state = lock_state(&self.catalog);
        let file_id = state.dbc_files.len();
        catalog::populate_from_dbc(&mut state.metric_db, &file, file_id);
        state.dbc_files.push(file);
        Ok(())
    }

    /// Write the configuration document
    ///
    /// Persists the general settings, the definition file list and the
    /// current selection snapshot.
    pub fn save_config(&self) -> Result<()> {
        let result = self.try_save_config();
        if let Err(ref e) = result {
            log::error!(
                "Can't save config file. File: {}, Error: {}",
                self.config_file,
                e
            );
        }
        result
    }

    fn try_save_config(&self) -> Result<()> {
        if self.config_file.is_empty() {
            return Err(BridgeError::Config(
                "No config file have been set.".to_string(),
            ));
        }
        let state = lock_state(&self.catalog);
        let doc = BridgeConfigDoc {
            shared_mem: self.shared_mem_name.clone(),
            bus_host: self.bus_host.clone(),
            bus_port: self.bus_port,
            broker_host: self.broker_host.clone(),
            broker_port: self.broker_port,
            dbc_files: state
                .dbc_files
                .iter()
                .filter(|f| !f.filename().is_empty())
                .map(|f| DbcFileEntry {
                    name: f.filename().to_string(),
                    file_name: f.filename().to_string(),
                })
                .collect(),
            selected_items: state
                .metric_db
                .selected_metrics()
                .into_iter()
                .map(|s| SelectedItemEntry {
                    name: s.name,
                    msg_id: s.group_identity,
                    msg_name: s.group_name,
                })
                .collect(),
        };
        drop(state);
        config::write_document(Path::new(&self.config_file), &doc)
    }

    /// Read the configuration document
    ///
    /// Applies defaults for missing settings, re-parses every listed
    /// definition file (parse failures are logged and skipped) and
    /// restores the persisted selection, clearing all prior selection
    /// flags first.
    pub fn load_config(&mut self) -> Result<()> {
        let result = self.try_load_config();
        if let Err(ref e) = result {
            log::error!(
                "Can't read config file. File: {}, Error: {}",
                self.config_file,
                e
            );
        }
        result
    }

    fn try_load_config(&mut self) -> Result<()> {
        if self.config_file.is_empty() {
            return Err(BridgeError::Config(
                "No config file have been set.".to_string(),
            ));
        }
        let doc = config::read_document(Path::new(&self.config_file))?;

        self.shared_mem_name = doc.shared_mem;
        self.bus_host = doc.bus_host;
        self.bus_port = doc.bus_port;
        self.broker_host = doc.broker_host;
        self.broker_port = doc.broker_port;

        let mut state = lock_state(&self.catalog);
        state.dbc_files.clear();
        for entry in &doc.dbc_files {
            let path = entry.path();
            if path.is_empty() {
                log::error!("Can't parse the DBC file. Error: File name is empty.");
                continue;
            }
            let mut file = DbcFile::new(path);
            match file.parse_file() {
                Ok(()) => {
                    let file_id = state.dbc_files.len();
                    catalog::populate_from_dbc(&mut state.metric_db, &file, file_id);
                    state.dbc_files.push(file);
                }
                Err(e) => {
                    log::error!("Can't parse the DBC file. File: {}, Error: {}", path, e);
                }
            }
        }

        state.metric_db.clear_selection();
        for item in &doc.selected_items {
            state.metric_db.create_group(&item.msg_name, item.msg_id);
            match state.metric_db.create_metric(item.msg_id, &item.name) {
                Some(metric) => metric.set_selected(true),
                None => {
                    log::error!(
                        "The selected metric not found in the DB. Metric: {} ({}:{})",
                        item.name,
                        item.msg_id,
                        item.msg_name
                    );
                }
            }
        }

        // Groups and metrics created by the selection restore have no
        // back-references yet; a second population pass over the arena
        // fills them in. First-writer-wins keeps existing references.
        let CatalogState {
            dbc_files,
            metric_db,
        } = &mut *state;
        for (file_id, file) in dbc_files.iter().enumerate() {
            catalog::populate_from_dbc(metric_db, file, file_id);
        }
        Ok(())
    }

    /// Bring the bridge from idle to actively decoding
    ///
    /// Always performs an implicit `stop()` first. On failure nothing is
    /// left running.
    pub fn start(&mut self) -> Result<()> {
        self.stop();
        match self.try_start() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("Can't start the service. Error: {}", e);
                self.stop();
                Err(e)
            }
        }
    }

    fn try_start(&mut self) -> Result<()> {
        // Connect to the CAN bus. It's either TCP/IP or a named bus.
        let (kind, options) = if !self.shared_mem_name.is_empty() {
            (
                BrokerKind::SharedMemory,
                BusOptions {
                    shared_mem_name: self.shared_mem_name.clone(),
                    ..Default::default()
                },
            )
        } else {
            (
                BrokerKind::Tcp,
                BusOptions {
                    host: self.bus_host.clone(),
                    port: self.bus_port,
                    ..Default::default()
                },
            )
        };
        let mut broker = bus::create_broker(kind, &options)?;
        let subscriber = broker.create_subscriber();
        subscriber.start();
        self.bus_broker = Some(broker);
        self.bus_subscriber = Some(Arc::clone(&subscriber));

        self.start_mqtt()?;

        self.stop_thread.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop_thread);
        let catalog = Arc::clone(&self.catalog);
        let node = Arc::clone(&self.mqtt_node);
        self.work_thread = Some(std::thread::spawn(move || {
            working_thread(stop, subscriber, catalog, node)
        }));
        Ok(())
    }

    /// Configure the node, assemble the publish topics and connect
    fn start_mqtt(&mut self) -> Result<()> {
        let state = lock_state(&self.catalog);
        let mut node = lock_node(&self.mqtt_node);

        node.name = format!("{}:{}", self.broker_host, self.broker_port);
        node.description = "Connection to the MQTT broker.".to_string();
        node.transport = self.transport_layer;
        node.host = self.broker_host.clone();
        node.port = self.broker_port;
        node.client_id = self.broker_client_id.clone();
        node.user_name = self.broker_user.clone();
        node.password = self.broker_password.clone();
        node.version = ProtocolVersion::V5;
        node.in_service();

        for group in state.metric_db.groups() {
            if group.metrics().next().is_none() {
                continue;
            }
            let topic_name = topic::topic_name_for_group(DEFAULT_NAMESPACE, group);
            let Some(mqtt_topic) = node.create_topic(&topic_name) else {
                return Err(BridgeError::Mqtt(format!(
                    "Failed to create the MQTT topic: {}",
                    topic_name
                )));
            };
            mqtt_topic.description = "JSON coded CAN signal values.".to_string();
            for metric in group.metrics() {
                if metric.name().is_empty() {
                    continue;
                }
                mqtt_topic.add_metric(MetricKey {
                    group_identity: group.identity(),
                    name: metric.name().to_string(),
                });
            }
        }

        node.init()
    }

    /// Stop the decode worker and release the transports
    ///
    /// Safe to call before any start and safe to call twice.
    pub fn stop(&mut self) {
        self.stop_thread.store(true, Ordering::SeqCst);
        log::trace!("Trying to stop the working thread.");
        if let Some(handle) = self.work_thread.take() {
            if handle.join().is_err() {
                log::error!("The working thread panicked.");
            }
        }
        log::trace!("Stopped the working thread.");

        {
            let mut node = lock_node(&self.mqtt_node);
            node.out_of_service();
            if let Err(e) = node.exit() {
                log::trace!("Failed to stop the MQTT client. Error: {}", e);
            }
        }

        if let Some(subscriber) = self.bus_subscriber.take() {
            subscriber.stop();
        }
        self.bus_broker = None;
    }
}

impl Default for CanMqttBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CanMqttBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The decode worker loop
fn working_thread(
    stop: Arc<AtomicBool>,
    subscriber: Arc<BusQueue>,
    catalog: Arc<Mutex<CatalogState>>,
    node: Arc<Mutex<MqttNode>>,
) {
    while !stop.load(Ordering::SeqCst) {
        let Some(message) = subscriber.pop_wait(Duration::from_secs(1)) else {
            continue;
        };
        let BusMessage::DataFrame(frame) = message else {
            continue;
        };
        let Some((topic_name, payload)) = update_metrics(&catalog, &frame) else {
            continue;
        };
        match payload.to_json() {
            Ok(bytes) => {
                let mut node = lock_node(&node);
                if let Err(e) = node.publish(&topic_name, &bytes) {
                    log::debug!("Failed to publish group. Topic: {}, Error: {}", topic_name, e);
                }
            }
            Err(e) => {
                log::error!("Failed to encode group payload. Error: {}", e);
            }
        }
    }
}

/// Decode one frame and update the owning group's metric values
///
/// Returns the topic name and payload of the group when at least one
/// metric value changed, clearing the updated flags.
fn update_metrics(
    catalog: &Mutex<CatalogState>,
    frame: &CanDataFrame,
) -> Option<(String, GroupPayload)> {
    let mut guard = lock_state(catalog);
    let state = &mut *guard;
    let identity = frame.can_id as i64;

    // Frames for identities the catalog was never told about, or that
    // never matched a definition file, are discarded.
    let Some(file_id) = state
        .metric_db
        .group_by_identity(identity)
        .and_then(|g| g.dbc_file())
    else {
        log::trace!("No catalog entry for frame: {}", frame);
        return None;
    };
    let file = state.dbc_files.get_mut(file_id)?;
    file.parse_message(frame);

    // The definition signals now hold fresh channel samples; pull them
    // into the metric values with the type each metric was inferred to.
    let CatalogState {
        dbc_files,
        metric_db,
    } = state;
    let group = metric_db.group_by_identity_mut(identity)?;
    let mut updated = false;
    for metric in group.metrics_mut() {
        let Some(sig_ref) = metric.signal().cloned() else {
            continue;
        };
        let Some(signal) = dbc_files
            .get(sig_ref.dbc_file)
            .and_then(|f| f.signal(sig_ref.message, &sig_ref.signal))
        else {
            continue;
        };
        let value = match metric.data_type() {
            t if t.is_signed() => MetricValue::Integer(signal.eng_value_i64()),
            t if t.is_unsigned() => MetricValue::Unsigned(signal.eng_value_u64()),
            t if t.is_floating() => MetricValue::Double(signal.eng_value_f64()),
            MetricType::Boolean => MetricValue::Boolean(signal.eng_value_bool()),
            _ => MetricValue::Text(signal.eng_value_text()),
        };
        metric.set_valid(signal.is_valid());
        metric.set_value(value);
        if metric.is_updated() {
            updated = true;
        }
    }
    if !updated {
        return None;
    }

    let group = metric_db.group_by_identity_mut(identity)?;
    for metric in group.metrics_mut() {
        metric.clear_updated();
    }
    let group = metric_db.group_by_identity(identity)?;
    let payload = GroupPayload::from_group(group, frame.timestamp());
    Some((
        topic::topic_name_for_group(DEFAULT_NAMESPACE, group),
        payload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusPublisher;
    use crate::signals::dbc::tests::{write_test_dbc, TEST_DBC};
    use std::time::Instant;

    fn data_frame(can_id: u32, data: Vec<u8>) -> BusMessage {
        BusMessage::DataFrame(CanDataFrame {
            timestamp_ns: 1_000_000_000,
            can_id,
            is_extended: false,
            data,
        })
    }

    /// Poll a condition until it holds or the timeout expires
    fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn engine_with_engine_data(bus_name: &str) -> (CanMqttBridge, MemoryMqttClient) {
        let client = MemoryMqttClient::new();
        let mut engine = CanMqttBridge::with_client(Box::new(client.clone()));
        engine.set_shared_mem_name(bus_name);
        engine.with_metrics_mut(|db| {
            db.create_group("EngineData", 291);
            db.create_metric(291, "EngineSpeed").unwrap();
            db.create_metric(291, "EngineTemp").unwrap();
            db.create_metric(291, "EngineState").unwrap();
        });
        (engine, client)
    }

    #[test]
    fn test_stop_before_start_is_a_noop() {
        let mut engine = CanMqttBridge::new();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_start_and_stop() {
        let (mut engine, client) = engine_with_engine_data("engine-start-stop");
        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(client.is_connected());

        engine.stop();
        assert!(!engine.is_running());
        assert!(!client.is_connected());

        // A second stop is safe
        engine.stop();
    }

    #[test]
    fn test_failed_start_leaves_nothing_running() {
        let (mut engine, client) = engine_with_engine_data("");
        // No shared bus name and no reachable TCP broker.
        engine.set_bus_address("127.0.0.1", 1);
        assert!(engine.start().is_err());
        assert!(!engine.is_running());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_start_twice_restarts() {
        let (mut engine, client) = engine_with_engine_data("engine-double-start");
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(client.is_connected());
        engine.stop();
    }

    #[test]
    fn test_topic_assembly_on_start() {
        let (mut engine, _client) = engine_with_engine_data("engine-topics");
        let dbc = write_test_dbc(TEST_DBC);
        engine.add_dbc_file(dbc.path().to_string_lossy()).unwrap();
        engine.start().unwrap();

        let node = lock_node(&engine.mqtt_node);
        let topic = node.topic("CanMetrics/EngineData").unwrap();
        assert_eq!(topic.content_type, "application/json");
        assert_eq!(topic.metrics().len(), 3);
        drop(node);

        engine.stop();
    }

    #[test]
    fn test_decode_updates_metrics_and_publishes() {
        let (mut engine, client) = engine_with_engine_data("engine-decode");
        let dbc = write_test_dbc(TEST_DBC);
        engine.add_dbc_file(dbc.path().to_string_lossy()).unwrap();
        engine.start().unwrap();

        let publisher = BusPublisher::open("engine-decode");
        // EngineSpeed = 800, EngineTemp raw 80 (-40 offset), EngineState = 1
        publisher.publish(data_frame(291, vec![0x20, 0x03, 0x50, 0x01, 0, 0, 0, 0]));

        assert!(wait_for(
            || {
                engine.with_metrics(|db| {
                    db.metric_by_group_identity(291, "EngineSpeed")
                        .map(|m| m.value() == &MetricValue::Unsigned(800))
                        .unwrap_or(false)
                })
            },
            Duration::from_secs(5)
        ));

        engine.with_metrics(|db| {
            let temp = db.metric_by_group_identity(291, "EngineTemp").unwrap();
            assert_eq!(temp.data_type(), MetricType::Double);
            assert_eq!(temp.value(), &MetricValue::Double(40.0));
            assert!(temp.is_valid());

            let state = db.metric_by_group_identity(291, "EngineState").unwrap();
            assert_eq!(state.value(), &MetricValue::Text("On".to_string()));
        });

        assert!(wait_for(
            || !client.published().is_empty(),
            Duration::from_secs(5)
        ));
        let published = client.published();
        assert_eq!(published[0].topic, "CanMetrics/EngineData");
        let json: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(json["metrics"]["EngineSpeed"]["value"], 800);

        engine.stop();
    }

    #[test]
    fn test_repeated_frame_publishes_once() {
        let (mut engine, client) = engine_with_engine_data("engine-repeat");
        let dbc = write_test_dbc(TEST_DBC);
        engine.add_dbc_file(dbc.path().to_string_lossy()).unwrap();
        engine.start().unwrap();

        let publisher = BusPublisher::open("engine-repeat");
        let frame = data_frame(291, vec![0x20, 0x03, 0x50, 0x01, 0, 0, 0, 0]);
        publisher.publish(frame.clone());
        assert!(wait_for(
            || !client.published().is_empty(),
            Duration::from_secs(5)
        ));

        // The same values again: nothing changed, nothing published.
        publisher.publish(frame);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(client.published().len(), 1);

        engine.stop();
    }

    #[test]
    fn test_unknown_identity_is_discarded() {
        let (mut engine, client) = engine_with_engine_data("engine-unknown");
        let dbc = write_test_dbc(TEST_DBC);
        engine.add_dbc_file(dbc.path().to_string_lossy()).unwrap();
        engine.start().unwrap();

        let publisher = BusPublisher::open("engine-unknown");
        publisher.publish(data_frame(0x7FF, vec![0xFF; 8]));
        std::thread::sleep(Duration::from_millis(100));

        engine.with_metrics(|db| {
            for metric in db.metrics() {
                assert_eq!(metric.value(), &MetricValue::Text(String::new()));
                assert!(!metric.is_valid());
            }
        });
        assert!(client.published().is_empty());

        engine.stop();
    }

    #[test]
    fn test_non_data_frames_are_discarded() {
        let (mut engine, client) = engine_with_engine_data("engine-remote");
        let dbc = write_test_dbc(TEST_DBC);
        engine.add_dbc_file(dbc.path().to_string_lossy()).unwrap();
        engine.start().unwrap();

        let publisher = BusPublisher::open("engine-remote");
        publisher.publish(BusMessage::RemoteFrame {
            timestamp_ns: 0,
            can_id: 291,
        });
        publisher.publish(BusMessage::ErrorFrame { timestamp_ns: 0 });
        std::thread::sleep(Duration::from_millis(100));

        assert!(client.published().is_empty());
        engine.stop();
    }

    #[test]
    fn test_save_config_without_path_fails() {
        let engine = CanMqttBridge::new();
        assert!(engine.save_config().is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");
        let dbc = write_test_dbc(TEST_DBC);
        let dbc_path = dbc.path().to_string_lossy().to_string();

        let mut saved = CanMqttBridge::new();
        saved.set_config_file(config_path.to_string_lossy());
        saved.set_shared_mem_name("round-trip-bus");
        saved.set_broker_address("broker.local", 8883);
        saved.with_metrics_mut(|db| {
            db.create_group("EngineData", 291);
            db.create_metric(291, "EngineSpeed").unwrap();
            db.create_metric(291, "EngineTemp").unwrap();
        });
        saved.add_dbc_file(&dbc_path).unwrap();
        saved.with_metrics_mut(|db| {
            db.metric_by_group_identity_mut(291, "EngineSpeed")
                .unwrap()
                .set_selected(true);
        });
        saved.save_config().unwrap();

        let mut loaded = CanMqttBridge::new();
        loaded.set_config_file(config_path.to_string_lossy());
        loaded.load_config().unwrap();

        assert_eq!(loaded.shared_mem_name(), "round-trip-bus");
        assert_eq!(loaded.broker_host(), "broker.local");
        assert_eq!(loaded.broker_port(), 8883);
        loaded.with_metrics(|db| {
            let selected = db.selected_metrics();
            assert_eq!(selected.len(), 1);
            assert_eq!(selected[0].name, "EngineSpeed");
            assert_eq!(selected[0].group_identity, 291);
            assert_eq!(selected[0].group_name, "EngineData");

            // The restored metric acquired its definition back-reference.
            let metric = db.metric_by_group_identity(291, "EngineSpeed").unwrap();
            assert!(metric.signal().is_some());
            assert_eq!(metric.unit(), "rpm");
        });
    }

    #[test]
    fn test_load_clears_prior_selection() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");

        // Persist a selection of only EngineSpeed.
        let mut saved = CanMqttBridge::new();
        saved.set_config_file(config_path.to_string_lossy());
        saved.with_metrics_mut(|db| {
            db.create_group("EngineData", 291);
            db.create_metric(291, "EngineSpeed").unwrap().set_selected(true);
        });
        saved.save_config().unwrap();

        // An engine with a different selection loads the document.
        let mut loaded = CanMqttBridge::new();
        loaded.set_config_file(config_path.to_string_lossy());
        loaded.with_metrics_mut(|db| {
            db.create_group("EngineData", 291);
            db.create_metric(291, "EngineTemp").unwrap().set_selected(true);
        });
        loaded.load_config().unwrap();

        loaded.with_metrics(|db| {
            assert!(!db
                .metric_by_group_identity(291, "EngineTemp")
                .unwrap()
                .is_selected());
            assert!(db
                .metric_by_group_identity(291, "EngineSpeed")
                .unwrap()
                .is_selected());
        });
    }

    #[test]
    fn test_load_skips_broken_dbc_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");
        let good = write_test_dbc(TEST_DBC);

        let doc = BridgeConfigDoc {
            dbc_files: vec![
                DbcFileEntry {
                    name: "/nonexistent/bad.dbc".to_string(),
                    file_name: "/nonexistent/bad.dbc".to_string(),
                },
                DbcFileEntry {
                    name: good.path().to_string_lossy().to_string(),
                    file_name: good.path().to_string_lossy().to_string(),
                },
            ],
            selected_items: vec![SelectedItemEntry {
                name: "EngineSpeed".to_string(),
                msg_id: 291,
                msg_name: "EngineData".to_string(),
            }],
            ..Default::default()
        };
        config::write_document(&config_path, &doc).unwrap();

        let mut engine = CanMqttBridge::new();
        engine.set_config_file(config_path.to_string_lossy());
        engine.load_config().unwrap();

        engine.with_metrics(|db| {
            let metric = db.metric_by_group_identity(291, "EngineSpeed").unwrap();
            assert!(metric.is_selected());
            assert!(metric.signal().is_some());
        });
    }

    #[test]
    fn test_first_writer_wins_across_files() {
        // Two definition files describe identity 291 with different
        // comments; the first parsed one keeps the group.
        let second_dbc = TEST_DBC.replace("Engine operating data", "Second description");
        let first = write_test_dbc(TEST_DBC);
        let second = write_test_dbc(&second_dbc);

        let mut engine = CanMqttBridge::new();
        engine.with_metrics_mut(|db| {
            db.create_group("EngineData", 291);
            db.create_metric(291, "EngineSpeed").unwrap();
        });
        engine.add_dbc_file(first.path().to_string_lossy()).unwrap();
        engine.add_dbc_file(second.path().to_string_lossy()).unwrap();

        engine.with_metrics(|db| {
            let group = db.group_by_identity(291).unwrap();
            assert_eq!(group.dbc_file(), Some(0));
            assert_eq!(group.description(), "Engine operating data");

            let metric = db.metric_by_group_identity(291, "EngineSpeed").unwrap();
            assert_eq!(metric.signal().unwrap().dbc_file, 0);
        });
    }
}
