//! Signal-definition subsystem
//!
//! Owns the crate's view of DBC networks: parsing definition files into
//! message/signal models and decoding live frames into channel samples.

pub mod dbc;
pub(crate) mod decode;

pub use dbc::{
    DbcFile, DbcMessage, DbcNetwork, DbcSignal, SignalByteOrder, SignalDataType, SignalSample,
};
