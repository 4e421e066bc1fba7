//! RTU request frame construction

use crate::constants::{FC_READ_HOLDING_REGISTERS, MAX_SLAVE_ID, MIN_SLAVE_ID, READ_REQUEST_LEN};
use crate::crc::crc16;
use crate::error::{ModbusError, Result};
use std::fmt;

/// Immutable RTU frame: `[slave][function][payload...][crc lo][crc hi]`
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a frame from its header and payload, appending the CRC
    pub(crate) fn with_crc(slave_id: u8, function_code: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(2 + payload.len() + 2);
        bytes.push(slave_id);
        bytes.push(function_code);
        bytes.extend_from_slice(payload);

        let crc = crc16(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());

        Self { bytes }
    }

    pub fn slave_id(&self) -> u8 {
        self.bytes[0]
    }

    pub fn function_code(&self) -> u8 {
        self.bytes[1]
    }

    /// Checksum carried in the last two bytes
    pub fn crc(&self) -> u16 {
        let len = self.bytes.len();
        u16::from_le_bytes([self.bytes[len - 2], self.bytes[len - 1]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", hex::encode_upper(&self.bytes))
    }
}

/// Build a Read Holding Registers (FC03) request.
///
/// Fails with `InvalidArgument` when `slave_id` is outside 1..=247 or
/// `quantity` is zero. Nothing is written anywhere on failure.
pub fn build_read_holding_registers_frame(
    slave_id: u8,
    start_address: u16,
    quantity: u16,
) -> Result<Frame> {
    if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&slave_id) {
        return Err(ModbusError::invalid_argument(format!(
            "slave id {} out of range {}-{}",
            slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
        )));
    }
    if quantity == 0 {
        return Err(ModbusError::invalid_argument(
            "register quantity must be at least 1",
        ));
    }

    let mut payload = [0u8; 4];
    payload[..2].copy_from_slice(&start_address.to_be_bytes());
    payload[2..].copy_from_slice(&quantity.to_be_bytes());

    let frame = Frame::with_crc(slave_id, FC_READ_HOLDING_REGISTERS, &payload);
    debug_assert_eq!(frame.len(), READ_REQUEST_LEN);
    Ok(frame)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_build_fc03_layout() {
        let frame = build_read_holding_registers_frame(1, 0x0000, 0x000A).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
        assert_eq!(frame.slave_id(), 1);
        assert_eq!(frame.function_code(), 0x03);
        assert_eq!(frame.crc(), 0xCDC5);
    }

    #[test]
    fn test_build_fc03_big_endian_fields() {
        let frame = build_read_holding_registers_frame(0x11, 0x006B, 0x0003).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..6], &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(frame.len(), READ_REQUEST_LEN);
    }

    #[test]
    fn test_crc_trailer_matches_header() {
        let cases = [
            (1u8, 0u16, 1u16),
            (1, 4, 2),
            (17, 0x1234, 125),
            (247, 0xFFFF, 0xFFFF),
            (100, 0x8000, 0x00FF),
        ];

        for (slave, start, qty) in cases {
            let frame = build_read_holding_registers_frame(slave, start, qty).unwrap();
            let bytes = frame.as_bytes();
            assert_eq!(bytes.len(), 8);
            let trailer = u16::from_le_bytes([bytes[6], bytes[7]]);
            assert_eq!(crc16(&bytes[..6]), trailer, "frame {:?}", frame);
        }
    }

    #[test]
    fn test_invalid_slave_id() {
        for slave in [0u8, 248, 255] {
            let err = build_read_holding_registers_frame(slave, 0, 1).unwrap_err();
            assert!(matches!(err, ModbusError::InvalidArgument(_)));
            assert!(err.to_string().contains("slave id"));
        }
    }

    #[test]
    fn test_zero_quantity() {
        let err = build_read_holding_registers_frame(1, 0, 0).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
    }

    #[test]
    fn test_frame_debug_is_hex() {
        let frame = build_read_holding_registers_frame(1, 4, 2).unwrap();
        assert_eq!(format!("{:?}", frame), "Frame(01030004000285CA)");
    }
}
