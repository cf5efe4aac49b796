//! TCP bus broker
//!
//! Connects to a remote bus broker and decodes its little-endian framed
//! records on a dedicated reader thread. Record layout:
//!
//! ```text
//! u8  tag          1 = data frame, 2 = remote frame, 3 = error frame
//! u64 timestamp    nanoseconds since epoch
//! u32 can_id       message identity (without the extended flag)
//! u8  flags        bit 0: extended identifier
//! u16 dlc          payload length
//! [u8; dlc]        payload (data frames only)
//! ```

use crate::bus::{BusBroker, BusMessage, BusQueue};
use crate::types::{BridgeError, CanDataFrame, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{BufReader, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

const TAG_DATA_FRAME: u8 = 1;
const TAG_REMOTE_FRAME: u8 = 2;
const TAG_ERROR_FRAME: u8 = 3;

/// Maximum accepted payload size (CAN-FD)
const MAX_DLC: u16 = 64;

/// Broker over a TCP connection to a remote bus
pub struct TcpBusBroker {
    stream: TcpStream,
    subscribers: Arc<Mutex<Vec<Arc<BusQueue>>>>,
    reader: Option<JoinHandle<()>>,
}

impl TcpBusBroker {
    /// Connect to the remote bus broker
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        log::info!("Connecting to bus broker: {}", address);
        let stream = TcpStream::connect(&address).map_err(|e| {
            BridgeError::BusTransport(format!("Failed to connect to {}: {}", address, e))
        })?;
        Ok(Self {
            stream,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            reader: None,
        })
    }

    fn spawn_reader(&mut self) -> Result<()> {
        let stream = self.stream.try_clone().map_err(|e| {
            BridgeError::BusTransport(format!("Failed to clone bus stream: {}", e))
        })?;
        let subscribers = Arc::clone(&self.subscribers);
        self.reader = Some(std::thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            loop {
                match read_message(&mut reader) {
                    Ok(message) => {
                        let subscribers = match subscribers.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        for subscriber in subscribers.iter() {
                            subscriber.push(message.clone());
                        }
                    }
                    Err(e) => {
                        log::info!("Bus connection closed: {}", e);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }
}

impl BusBroker for TcpBusBroker {
    fn create_subscriber(&mut self) -> Arc<BusQueue> {
        let queue = BusQueue::new();
        match self.subscribers.lock() {
            Ok(mut guard) => guard.push(Arc::clone(&queue)),
            Err(poisoned) => poisoned.into_inner().push(Arc::clone(&queue)),
        }
        if self.reader.is_none() {
            if let Err(e) = self.spawn_reader() {
                log::error!("Failed to start the bus reader: {}", e);
            }
        }
        queue
    }
}

impl Drop for TcpBusBroker {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// Read one framed record from the stream
fn read_message<R: Read>(reader: &mut R) -> std::io::Result<BusMessage> {
    let tag = reader.read_u8()?;
    let timestamp_ns = reader.read_u64::<LittleEndian>()?;
    let can_id = reader.read_u32::<LittleEndian>()?;
    let flags = reader.read_u8()?;
    let dlc = reader.read_u16::<LittleEndian>()?;
    if dlc > MAX_DLC {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame payload too large: {} bytes", dlc),
        ));
    }
    let mut data = vec![0u8; dlc as usize];
    reader.read_exact(&mut data)?;

    match tag {
        TAG_DATA_FRAME => Ok(BusMessage::DataFrame(CanDataFrame {
            timestamp_ns,
            can_id,
            is_extended: flags & 0x01 != 0,
            data,
        })),
        TAG_REMOTE_FRAME => Ok(BusMessage::RemoteFrame {
            timestamp_ns,
            can_id,
        }),
        TAG_ERROR_FRAME => Ok(BusMessage::ErrorFrame { timestamp_ns }),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown frame tag: {}", other),
        )),
    }
}
