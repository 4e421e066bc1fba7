//! Serial transport abstraction
//!
//! The master only needs to write a frame, pull incoming chunks and know
//! whether the line is usable. `SerialPortTransport` provides that on top of
//! tokio-serial; tests and the simulator plug in their own implementations.

use crate::constants::READ_CHUNK_SIZE;
use crate::error::{ModbusError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

/// Byte-oriented half-duplex serial channel
#[async_trait]
pub trait SerialTransport: Send {
    /// Whether the channel can currently be used
    fn is_open(&self) -> bool;

    /// Write a complete frame
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Wait for the next chunk of incoming bytes.
    ///
    /// Must be cancel-safe: the master drops this future when its timer fires.
    async fn read_chunk(&mut self) -> Result<Vec<u8>>;

    /// Drop any input already received but not yet read, returning how many
    /// bytes were discarded
    async fn discard_input(&mut self) -> Result<usize> {
        Ok(0)
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

impl SerialParams {
    /// 8 data bits, 1 stop bit, no parity
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
        }
    }

    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// tokio-serial backed transport
pub struct SerialPortTransport {
    port: Option<SerialStream>,
    device: String,
}

impl std::fmt::Debug for SerialPortTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortTransport")
            .field("device", &self.device)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialPortTransport {
    /// Open the serial device described by `params`
    pub fn open(params: &SerialParams) -> Result<Self> {
        debug!("RTU: {} @{}baud", params.device, params.baud_rate);

        let port = tokio_serial::new(&params.device, params.baud_rate)
            .data_bits(params.data_bits())
            .parity(params.parity.into())
            .stop_bits(params.stop_bits())
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| {
                error!("RTU err: {} - {}", params.device, e);
                ModbusError::connection(format!(
                    "Failed to open serial port {}: {}",
                    params.device, e
                ))
            })?;

        info!("RTU opened: {}", params.device);
        Ok(Self {
            port: Some(port),
            device: params.device.clone(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Release the device; the transport reports closed afterwards
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("RTU closed: {}", self.device);
        }
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream> {
        self.port.as_mut().ok_or(ModbusError::TransportClosed)
    }
}

#[async_trait]
impl SerialTransport for SerialPortTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(frame).await.map_err(|e| {
            error!("RTU TX: {}", e);
            ModbusError::Io(format!("Serial send error: {e}"))
        })?;
        port.flush().await.map_err(|e| {
            error!("RTU flush: {}", e);
            ModbusError::Io(format!("Serial flush error: {e}"))
        })?;
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        let mut buffer = [0u8; READ_CHUNK_SIZE];
        let n = port.read(&mut buffer).await.map_err(|e| {
            error!("RTU RX: {}", e);
            ModbusError::Io(format!("Serial read error: {e}"))
        })?;
        if n == 0 {
            error!("RTU closed");
            self.port = None;
            return Err(ModbusError::TransportClosed);
        }
        Ok(buffer[..n].to_vec())
    }

    async fn discard_input(&mut self) -> Result<usize> {
        let port = self.port_mut()?;
        let pending = pending_input(port.bytes_to_read());
        port.clear(ClearBuffer::Input)?;
        Ok(pending)
    }
}

/// The driver's input count is only reported; a failed query still lets the
/// clear go ahead
fn pending_input(count: tokio_serial::Result<u32>) -> usize {
    match count {
        Ok(n) => n as usize,
        Err(e) => {
            debug!("RTU input count unavailable: {}", e);
            0
        },
    }
}
