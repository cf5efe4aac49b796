//! Frame decode engine
//!
//! Extracts raw signal values from CAN frame payloads and stores them as
//! channel samples on the network model. Handles bit extraction,
//! endianness, sign extension and multiplexing.

use crate::signals::dbc::{DbcMessage, DbcSignal, SignalByteOrder, SignalDataType, SignalSample};
use crate::types::CanDataFrame;

/// Update all channel samples of a message from one frame
///
/// Multiplexed signals whose switch value does not match the frame keep
/// their previous sample. Signals that do not fit in the payload are marked
/// invalid.
pub(crate) fn update_message(message: &mut DbcMessage, frame: &CanDataFrame) {
    // For multiplexed messages, extract the switch value first
    let mux_value = message.multiplexer_signal.as_ref().and_then(|name| {
        message
            .signals
            .get(name)
            .and_then(|sig| extract_raw(&frame.data, sig))
            .map(|raw| raw as u64)
    });

    for signal in message.signals.values_mut() {
        if let Some(ref active) = signal.mux_values {
            match mux_value {
                Some(current) if active.contains(&current) => {}
                _ => continue,
            }
        }

        if signal.is_array_value() {
            let sample = extract_bytes(&frame.data, signal);
            let valid = sample.is_some();
            signal.set_sample(sample.unwrap_or(SignalSample::Empty), valid);
            continue;
        }

        match extract_raw(&frame.data, signal) {
            Some(raw) => signal.set_sample(SignalSample::Scalar(raw), true),
            None => signal.set_sample(SignalSample::Empty, false),
        }
    }
}

/// Extract the raw scalar value of a signal from frame data
///
/// Returns the sign-extended value for signed signals and the zero-extended
/// value for everything else, or None if the signal does not fit.
fn extract_raw(data: &[u8], signal: &DbcSignal) -> Option<i64> {
    let start_bit = signal.start_bit as usize;
    let length = signal.bit_length as usize;

    let required_bytes = (start_bit + length + 7) / 8;
    if length == 0 || length > 64 || required_bytes > data.len() {
        log::warn!(
            "Signal '{}' requires {} bytes but frame only has {} bytes",
            signal.name,
            required_bytes,
            data.len()
        );
        return None;
    }

    let raw = match signal.byte_order {
        SignalByteOrder::LittleEndian => extract_little_endian(data, start_bit, length),
        SignalByteOrder::BigEndian => extract_big_endian(data, start_bit, length),
    };

    Some(match signal.data_type {
        SignalDataType::Signed => sign_extend(raw, length),
        _ => raw as i64,
    })
}

/// Capture the byte range of an array/byte-string signal
fn extract_bytes(data: &[u8], signal: &DbcSignal) -> Option<SignalSample> {
    let start = signal.start_bit as usize / 8;
    let len = (signal.bit_length as usize + 7) / 8;
    if start + len > data.len() {
        return None;
    }
    Some(SignalSample::Bytes(data[start..start + len].to_vec()))
}

/// Extract signal bits with little-endian (Intel) byte order
///
/// The start bit points to the LSB; bits are numbered from LSB to MSB
/// within each byte.
fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = bit_pos % 8;

        if byte_idx < data.len() {
            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << i;
        }
    }

    result
}

/// Extract signal bits with big-endian (Motorola) byte order
///
/// The start bit points to the MSB of the signal; bit 0 is the MSB of
/// byte 0 and the signal grows towards higher bit numbers.
fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = 7 - (bit_pos % 8);

        if byte_idx < data.len() {
            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << (length - 1 - i);
        }
    }

    result
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_signal(start_bit: u16, bit_length: u16, data_type: SignalDataType) -> DbcSignal {
        DbcSignal {
            name: "Test".to_string(),
            start_bit,
            bit_length,
            byte_order: SignalByteOrder::LittleEndian,
            data_type,
            scale: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: String::new(),
            comment: String::new(),
            enum_list: BTreeMap::new(),
            mux_values: None,
            sample: SignalSample::Empty,
            valid: false,
        }
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 8), 0xAB);
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 16), 0xCDAB);
    }

    #[test]
    fn test_extract_big_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_big_endian(&data, 7, 8), 0xAB);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x8000, 16), -32768);
    }

    #[test]
    fn test_extract_raw_signed() {
        let signal = test_signal(8, 8, SignalDataType::Signed);
        let raw = extract_raw(&[0x00, 0xFE, 0x00], &signal).unwrap();
        assert_eq!(raw, -2);
    }

    #[test]
    fn test_extract_raw_short_frame() {
        let signal = test_signal(56, 16, SignalDataType::Unsigned);
        assert!(extract_raw(&[0x00; 4], &signal).is_none());
    }

    #[test]
    fn test_extract_bytes_range() {
        let signal = test_signal(16, 80, SignalDataType::Unsigned);
        let data: Vec<u8> = (0..12).collect();
        match extract_bytes(&data, &signal) {
            Some(SignalSample::Bytes(bytes)) => assert_eq!(bytes, (2..12).collect::<Vec<u8>>()),
            other => panic!("unexpected sample: {:?}", other),
        }
    }
}
