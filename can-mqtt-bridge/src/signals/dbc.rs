//! DBC file parser and runtime network model
//!
//! Parses Vector DBC files with the `can-dbc` crate and converts them into
//! the crate's own network model. The model is structurally immutable after
//! parse; only the per-signal channel samples mutate while the bridge runs.

use crate::signals::decode;
use crate::types::{BridgeError, CanDataFrame, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value kind of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDataType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
    /// IEEE 754 single precision
    Float,
    /// IEEE 754 double precision
    Double,
}

/// Latest decoded channel value of a signal
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SignalSample {
    /// No frame carrying this signal has been decoded yet
    #[default]
    Empty,
    /// Raw bits, sign-extended for signed signals
    Scalar(i64),
    /// Payload slice of an array/byte-string signal
    Bytes(Vec<u8>),
}

/// A CAN signal definition plus its runtime channel state
#[derive(Debug, Clone)]
pub struct DbcSignal {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame
    pub start_bit: u16,
    /// Length in bits
    pub bit_length: u16,
    /// Byte order for extraction
    pub byte_order: SignalByteOrder,
    /// Value kind (signed/unsigned/float/double)
    pub data_type: SignalDataType,
    /// Scale factor to convert raw value to physical value
    pub scale: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "V")
    pub unit: String,
    /// Comment text from the DBC file
    pub comment: String,
    /// Enumerated value table (raw value -> label), sorted by raw value
    pub enum_list: BTreeMap<i64, String>,
    /// Multiplexer switch values for which this signal is active
    pub mux_values: Option<Vec<u64>>,

    pub(crate) sample: SignalSample,
    pub(crate) valid: bool,
}

impl DbcSignal {
    /// True if the signal carries more bits than any scalar type holds
    pub fn is_array_value(&self) -> bool {
        self.bit_length > 64
    }

    /// Validity of the latest channel sample
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Latest channel sample
    pub fn sample(&self) -> &SignalSample {
        &self.sample
    }

    pub(crate) fn set_sample(&mut self, sample: SignalSample, valid: bool) {
        self.sample = sample;
        self.valid = valid;
    }

    fn raw_as_f64(&self, raw: i64) -> f64 {
        match self.data_type {
            SignalDataType::Signed => raw as f64,
            SignalDataType::Unsigned => raw as u64 as f64,
            SignalDataType::Float => f32::from_bits(raw as u64 as u32) as f64,
            SignalDataType::Double => f64::from_bits(raw as u64),
        }
    }

    fn has_transform(&self) -> bool {
        self.scale != 1.0 || self.offset != 0.0
    }

    /// Engineering value as double (scale and offset applied)
    pub fn eng_value_f64(&self) -> f64 {
        match self.sample {
            SignalSample::Scalar(raw) => self.offset + self.scale * self.raw_as_f64(raw),
            _ => 0.0,
        }
    }

    /// Engineering value as signed 64-bit integer
    pub fn eng_value_i64(&self) -> i64 {
        match self.sample {
            SignalSample::Scalar(raw) if !self.has_transform() => match self.data_type {
                SignalDataType::Signed | SignalDataType::Unsigned => raw,
                _ => self.eng_value_f64() as i64,
            },
            SignalSample::Scalar(_) => self.eng_value_f64() as i64,
            _ => 0,
        }
    }

    /// Engineering value as unsigned 64-bit integer
    pub fn eng_value_u64(&self) -> u64 {
        match self.sample {
            SignalSample::Scalar(raw) if !self.has_transform() => match self.data_type {
                SignalDataType::Signed | SignalDataType::Unsigned => raw as u64,
                _ => self.eng_value_f64() as u64,
            },
            SignalSample::Scalar(_) => self.eng_value_f64() as u64,
            _ => 0,
        }
    }

    /// Engineering value as boolean
    pub fn eng_value_bool(&self) -> bool {
        matches!(self.sample, SignalSample::Scalar(raw) if raw != 0)
    }

    /// Engineering value as text
    ///
    /// Enumerated signals render their label, array signals render the
    /// payload in hexadecimal, everything else renders the scaled number.
    pub fn eng_value_text(&self) -> String {
        match &self.sample {
            SignalSample::Empty => String::new(),
            SignalSample::Bytes(bytes) => {
                bytes.iter().map(|b| format!("{:02X}", b)).collect::<String>()
            }
            SignalSample::Scalar(raw) => {
                if let Some(label) = self.enum_list.get(raw) {
                    return label.clone();
                }
                if self.has_transform()
                    || matches!(self.data_type, SignalDataType::Float | SignalDataType::Double)
                {
                    format!("{}", self.eng_value_f64())
                } else if self.data_type == SignalDataType::Unsigned {
                    format!("{}", *raw as u64)
                } else {
                    format!("{}", raw)
                }
            }
        }
    }
}

/// A CAN message definition with its signals
#[derive(Debug, Clone)]
pub struct DbcMessage {
    /// CAN message identity (without the extended flag)
    pub ident: u32,
    /// True for 29-bit identifiers
    pub is_extended: bool,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// Comment text from the DBC file
    pub comment: String,
    /// Multiplexer switch signal name (if the message is multiplexed)
    pub multiplexer_signal: Option<String>,
    /// Signals keyed by name
    pub signals: BTreeMap<String, DbcSignal>,
}

/// A parsed DBC network: messages keyed by CAN identity
#[derive(Debug, Clone, Default)]
pub struct DbcNetwork {
    messages: BTreeMap<u32, DbcMessage>,
}

impl DbcNetwork {
    /// All messages keyed by identity
    pub fn messages(&self) -> &BTreeMap<u32, DbcMessage> {
        &self.messages
    }

    /// Look up a message by identity
    pub fn message(&self, ident: u32) -> Option<&DbcMessage> {
        self.messages.get(&ident)
    }

    pub(crate) fn message_mut(&mut self, ident: u32) -> Option<&mut DbcMessage> {
        self.messages.get_mut(&ident)
    }
}

/// A signal-definition file and its parsed network
///
/// Owned by the bridge engine for the process lifetime once parsed.
#[derive(Debug, Clone)]
pub struct DbcFile {
    filename: String,
    network: Option<DbcNetwork>,
}

impl DbcFile {
    /// Create an unparsed file reference
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            network: None,
        }
    }

    /// Path this file was created with
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Parsed network, if `parse_file` succeeded
    pub fn network(&self) -> Option<&DbcNetwork> {
        self.network.as_ref()
    }

    /// Parse the DBC file into the crate's network model
    pub fn parse_file(&mut self) -> Result<()> {
        log::info!("Parsing DBC file: {}", self.filename);

        // Read the DBC file as bytes first (handle non-UTF8 encodings)
        let bytes = std::fs::read(Path::new(&self.filename)).map_err(|e| {
            BridgeError::DbcParse(format!("Failed to read file {}: {}", self.filename, e))
        })?;

        // Try UTF-8 first, then fall back to Latin-1 encoding
        let content = String::from_utf8(bytes.clone()).unwrap_or_else(|_| {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            bytes.iter().map(|&b| b as char).collect()
        });

        let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
            BridgeError::DbcParse(format!(
                "Failed to parse DBC file {}: {:?}",
                self.filename, e
            ))
        })?;

        let network = convert_network(&dbc);
        log::info!(
            "Parsed {} messages from {}",
            network.messages().len(),
            self.filename
        );
        self.network = Some(network);
        Ok(())
    }

    /// Decode a frame into the channel samples of the matching message
    ///
    /// Messages this network does not define are ignored.
    pub fn parse_message(&mut self, frame: &CanDataFrame) {
        if let Some(network) = self.network.as_mut() {
            if let Some(message) = network.message_mut(frame.can_id) {
                decode::update_message(message, frame);
            }
        }
    }

    /// Look up a signal by message identity and name
    pub fn signal(&self, message: u32, name: &str) -> Option<&DbcSignal> {
        self.network
            .as_ref()
            .and_then(|n| n.message(message))
            .and_then(|m| m.signals.get(name))
    }
}

/// Convert a parsed can-dbc document into the crate network model
fn convert_network(dbc: &can_dbc::DBC) -> DbcNetwork {
    // Comment, value-table and float-kind records live outside the message
    // definitions in a DBC file; index them up front.
    let mut msg_comments: HashMap<u32, &str> = HashMap::new();
    let mut sig_comments: HashMap<(u32, &str), &str> = HashMap::new();
    for comment in dbc.comments() {
        match comment {
            can_dbc::Comment::Message {
                message_id,
                comment,
            } => {
                msg_comments.insert(message_id.0, comment.as_str());
            }
            can_dbc::Comment::Signal {
                message_id,
                signal_name,
                comment,
            } => {
                sig_comments.insert((message_id.0, signal_name.as_str()), comment.as_str());
            }
            _ => {}
        }
    }

    let mut sig_enums: HashMap<(u32, &str), BTreeMap<i64, String>> = HashMap::new();
    for value_desc in dbc.value_descriptions() {
        if let can_dbc::ValueDescription::Signal {
            message_id,
            signal_name,
            value_descriptions,
        } = value_desc
        {
            let table = value_descriptions
                .iter()
                .map(|v| (*v.a() as i64, v.b().clone()))
                .collect();
            sig_enums.insert((message_id.0, signal_name.as_str()), table);
        }
    }

    let mut sig_float_kind: HashMap<(u32, &str), SignalDataType> = HashMap::new();
    for entry in dbc.signal_extended_value_type_list() {
        let kind = match entry.signal_extended_value_type() {
            can_dbc::SignalExtendedValueType::IEEEfloat32Bit => SignalDataType::Float,
            can_dbc::SignalExtendedValueType::IEEEdouble64bit => SignalDataType::Double,
            can_dbc::SignalExtendedValueType::SignedOrUnsignedInteger => continue,
        };
        sig_float_kind.insert((entry.message_id().0, entry.signal_name().as_str()), kind);
    }

    let mut network = DbcNetwork::default();
    for dbc_msg in dbc.messages() {
        let raw_id = dbc_msg.message_id().0;
        let ident = raw_id & 0x1FFF_FFFF;
        let is_extended = raw_id & 0x8000_0000 != 0;

        let mut multiplexer_signal = None;
        for dbc_sig in dbc_msg.signals() {
            if matches!(
                dbc_sig.multiplexer_indicator(),
                can_dbc::MultiplexIndicator::Multiplexor
            ) {
                multiplexer_signal = Some(dbc_sig.name().clone());
                break;
            }
        }

        let mut signals = BTreeMap::new();
        for dbc_sig in dbc_msg.signals() {
            let signal = convert_signal(dbc_sig, raw_id, &sig_comments, &sig_enums, &sig_float_kind);
            signals.insert(signal.name.clone(), signal);
        }

        let message = DbcMessage {
            ident,
            is_extended,
            name: dbc_msg.message_name().clone(),
            size: *dbc_msg.message_size() as usize,
            comment: msg_comments
                .get(&raw_id)
                .map(|c| c.to_string())
                .unwrap_or_default(),
            multiplexer_signal,
            signals,
        };
        network.messages.insert(ident, message);
    }
    network
}

fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    raw_msg_id: u32,
    sig_comments: &HashMap<(u32, &str), &str>,
    sig_enums: &HashMap<(u32, &str), BTreeMap<i64, String>>,
    sig_float_kind: &HashMap<(u32, &str), SignalDataType>,
) -> DbcSignal {
    let key = (raw_msg_id, dbc_sig.name().as_str());

    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => SignalByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => SignalByteOrder::BigEndian,
    };

    // SIG_VALTYPE_ records override the plain signed/unsigned kind
    let data_type = sig_float_kind.get(&key).copied().unwrap_or_else(|| {
        match *dbc_sig.value_type() {
            can_dbc::ValueType::Signed => SignalDataType::Signed,
            can_dbc::ValueType::Unsigned => SignalDataType::Unsigned,
        }
    });

    let mux_values = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(switch_value) => {
            Some(vec![switch_value])
        }
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(switch_value) => {
            Some(vec![switch_value])
        }
        _ => None,
    };

    DbcSignal {
        name: dbc_sig.name().clone(),
        start_bit: *dbc_sig.start_bit() as u16,
        bit_length: *dbc_sig.signal_size() as u16,
        byte_order,
        data_type,
        scale: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: dbc_sig.unit().clone(),
        comment: sig_comments
            .get(&key)
            .map(|c| c.to_string())
            .unwrap_or_default(),
        enum_list: sig_enums.get(&key).cloned().unwrap_or_default(),
        mux_values,
        sample: SignalSample::Empty,
        valid: false,
    }
}
