//! CRC-16/MODBUS
//!
//! Reflected polynomial 0xA001 (0x8005), initial value 0xFFFF, no final XOR.
//! On the wire the checksum is transmitted low byte first.

/// Calculate CRC16 checksum (Modbus RTU standard)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crc::{Crc, CRC_16_MODBUS};

    const ORACLE: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

    #[test]
    fn test_crc16_empty_data() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_canonical_vector() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16(&data), 0xCDC5);
        assert_eq!(crc16(&data), ORACLE.checksum(&data));
    }

    #[test]
    fn test_crc16_single_register_request() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&data), 0x0A84);
    }

    #[test]
    fn test_crc16_matches_oracle() {
        let samples: [&[u8]; 5] = [
            &[0x00],
            &[0xFF, 0xFF, 0xFF],
            &[0x01, 0x03, 0x04, 0x41, 0xA0, 0x00, 0x00],
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03],
            b"123456789",
        ];

        for data in samples {
            assert_eq!(crc16(data), ORACLE.checksum(data), "data: {:02X?}", data);
        }
    }

    #[test]
    fn test_crc16_consistency() {
        let data = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&data), crc16(&data));
    }

    #[test]
    fn test_crc16_frame_with_trailer_is_zero() {
        // Appending the CRC (little-endian) to the data yields a zero residue
        let mut frame = vec![0x01, 0x03, 0x04, 0x41, 0xA0, 0x00, 0x00];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc16(&frame), 0x0000);
    }
}
