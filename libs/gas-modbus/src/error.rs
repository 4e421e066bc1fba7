//! Modbus master error types

use crate::constants::exception_description;
use std::time::Duration;
use thiserror::Error;

/// Result type for gas-modbus operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Errors a transaction can resolve with
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Malformed request parameters, rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Another transaction is outstanding on this channel
    #[error("Channel busy: a transaction is already outstanding")]
    ChannelBusy,

    /// No complete, valid frame within the deadline
    #[error("Timeout: no complete response within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Complete frame arrived but failed the integrity check
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    /// Serial channel not open, or closed while waiting
    #[error("Transport closed")]
    TransportClosed,

    /// Slave answered with a Modbus exception
    #[error("Modbus exception FC{function:02X} code 0x{code:02X} ({})", describe(.code))]
    Exception { function: u8, code: u8 },

    /// Valid frame that does not belong to the outstanding request
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Serial port could not be opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),
}

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        ModbusError::Connection(err.to_string())
    }
}

// Helper methods for creating errors
impl ModbusError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ModbusError::InvalidArgument(msg.into())
    }

    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        ModbusError::UnexpectedResponse(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    /// Whether the caller may reasonably reissue the same request.
    ///
    /// Only "device silent" and "line noise" qualify; the core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout(_) | ModbusError::CrcMismatch { .. }
        )
    }

    /// Check if this error means the serial channel has to be reopened
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            ModbusError::TransportClosed | ModbusError::Connection(_) | ModbusError::Io(_)
        )
    }
}
