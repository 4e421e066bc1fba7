//! Response assembly for RTU responses
//!
//! Bytes arrive from the serial line in arbitrary chunks. The accumulator
//! collects them until the declared byte count says the frame is complete,
//! then validates the CRC and extracts the registers.
//!
//! ```text
//! [addr][fc][byte count][data: byte count bytes][crc lo][crc hi]
//! [addr][fc|0x80][exception code][crc lo][crc hi]
//! ```

use crate::constants::{
    CRC_LEN, EXCEPTION_BIT, EXCEPTION_RESPONSE_LEN, MIN_RESPONSE_LEN, READ_CHUNK_SIZE,
    RESPONSE_HEADER_LEN,
};
use crate::crc::crc16;
use tracing::{trace, warn};

/// Result of feeding bytes into the accumulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerState {
    /// More bytes are needed
    Incomplete { buffered: usize },
    /// Frame complete and CRC valid
    Complete(Vec<u16>),
    /// Frame complete but the trailing CRC does not match
    ChecksumMismatch { expected: u16, received: u16 },
    /// Exception frame complete and CRC valid
    Exception { function: u8, code: u8 },
}

impl AssemblerState {
    /// Whether the transaction owning the accumulator is finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssemblerState::Incomplete { .. })
    }
}

/// Growable buffer scoped to a single transaction
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    buffer: Vec<u8>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Bytes received so far
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn slave_id(&self) -> Option<u8> {
        self.buffer.first().copied()
    }

    pub fn function_code(&self) -> Option<u8> {
        self.buffer.get(1).copied()
    }

    /// Total frame length, known once the byte-count field has arrived
    pub fn expected_len(&self) -> Option<usize> {
        if self.buffer.len() < MIN_RESPONSE_LEN {
            return None;
        }

        if self.buffer[1] & EXCEPTION_BIT != 0 {
            Some(EXCEPTION_RESPONSE_LEN)
        } else {
            let byte_count = self.buffer[2] as usize;
            Some(RESPONSE_HEADER_LEN + byte_count + CRC_LEN)
        }
    }

    /// Append a chunk and report the assembly state
    pub fn feed(&mut self, incoming: &[u8]) -> AssemblerState {
        self.buffer.extend_from_slice(incoming);

        let Some(expected_len) = self.expected_len() else {
            return AssemblerState::Incomplete {
                buffered: self.buffer.len(),
            };
        };

        if self.buffer.len() < expected_len {
            trace!("RTU RX partial: {}/{}B", self.buffer.len(), expected_len);
            return AssemblerState::Incomplete {
                buffered: self.buffer.len(),
            };
        }

        // Half-duplex: nothing legitimate follows the response
        if self.buffer.len() > expected_len {
            warn!(
                "RTU framing: {}B past end of {}B frame discarded",
                self.buffer.len() - expected_len,
                expected_len
            );
            self.buffer.truncate(expected_len);
        }

        let crc_offset = expected_len - CRC_LEN;
        let received = u16::from_le_bytes([self.buffer[crc_offset], self.buffer[crc_offset + 1]]);
        let expected = crc16(&self.buffer[..crc_offset]);
        if received != expected {
            return AssemblerState::ChecksumMismatch { expected, received };
        }

        let function = self.buffer[1];
        if function & EXCEPTION_BIT != 0 {
            return AssemblerState::Exception {
                function: function & !EXCEPTION_BIT,
                code: self.buffer[2],
            };
        }

        let registers = self.buffer[RESPONSE_HEADER_LEN..crc_offset]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        AssemblerState::Complete(registers)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    /// `[01 03 04 41 A0 00 00]` + CRC: one float32 register pair (20.0)
    const RESPONSE: [u8; 9] = [0x01, 0x03, 0x04, 0x41, 0xA0, 0x00, 0x00, 0xEE, 0x2D];

    fn response_frame(slave: u8, registers: &[u16]) -> Vec<u8> {
        let mut frame = vec![slave, 0x03, (registers.len() * 2) as u8];
        for reg in registers {
            frame.extend_from_slice(&reg.to_be_bytes());
        }
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn feed_in_chunks(frame: &[u8], chunk_size: usize) -> AssemblerState {
        let mut acc = ResponseAccumulator::new();
        let mut state = AssemblerState::Incomplete { buffered: 0 };
        for chunk in frame.chunks(chunk_size) {
            state = acc.feed(chunk);
        }
        state
    }

    #[test]
    fn test_complete_single_chunk() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.feed(&RESPONSE), AssemblerState::Complete(vec![0x41A0, 0x0000]));
        assert_eq!(acc.slave_id(), Some(0x01));
        assert_eq!(acc.function_code(), Some(0x03));
    }

    #[test]
    fn test_incomplete_until_byte_count_known() {
        let mut acc = ResponseAccumulator::new();
        for (i, byte) in RESPONSE[..4].iter().enumerate() {
            assert_eq!(
                acc.feed(&[*byte]),
                AssemblerState::Incomplete { buffered: i + 1 }
            );
            assert_eq!(acc.expected_len(), None);
        }

        assert!(!acc.feed(&RESPONSE[4..5]).is_terminal());
        assert_eq!(acc.expected_len(), Some(9));
    }

    #[test]
    fn test_chunking_never_changes_outcome() {
        let frame = response_frame(7, &[0x0001, 0x41A0, 0x0000, 0xFFFF, 0x1234]);
        let whole = feed_in_chunks(&frame, frame.len());
        assert_eq!(
            whole,
            AssemblerState::Complete(vec![0x0001, 0x41A0, 0x0000, 0xFFFF, 0x1234])
        );

        for chunk_size in 1..frame.len() {
            assert_eq!(feed_in_chunks(&frame, chunk_size), whole, "chunk size {}", chunk_size);
        }

        // Irregular split points
        for split in 1..frame.len() {
            let mut acc = ResponseAccumulator::new();
            assert!(!acc.feed(&frame[..split]).is_terminal());
            assert_eq!(acc.feed(&frame[split..]), whole, "split at {}", split);
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = RESPONSE;
        frame[8] ^= 0xFF;
        let mut acc = ResponseAccumulator::new();
        assert_eq!(
            acc.feed(&frame),
            AssemblerState::ChecksumMismatch {
                expected: 0x2DEE,
                received: 0xD2EE,
            }
        );
    }

    #[test]
    fn test_single_bit_flips_are_detected() {
        let crc_offset = RESPONSE.len() - 2;
        for byte in 0..crc_offset {
            for bit in 0..8 {
                let mut frame = RESPONSE;
                frame[byte] ^= 1 << bit;
                let state = feed_in_chunks(&frame, frame.len());

                if byte == 2 {
                    // Byte-count field: frame length itself changes
                    assert!(
                        !matches!(state, AssemblerState::Complete(_)),
                        "byte {} bit {}: {:?}",
                        byte,
                        bit,
                        state
                    );
                } else {
                    assert!(
                        matches!(state, AssemblerState::ChecksumMismatch { .. }),
                        "byte {} bit {}: {:?}",
                        byte,
                        bit,
                        state
                    );
                }
            }
        }
    }

    #[test]
    fn test_excess_bytes_are_discarded() {
        let mut frame = RESPONSE.to_vec();
        frame.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.feed(&frame), AssemblerState::Complete(vec![0x41A0, 0x0000]));
        assert_eq!(acc.buffered(), &RESPONSE);
    }

    #[test]
    fn test_exception_response() {
        // FC03 | 0x80, code 0x02 (Illegal Data Address)
        let frame = [0x01, 0x83, 0x02, 0xC0, 0xF1];
        for chunk_size in 1..=frame.len() {
            assert_eq!(
                feed_in_chunks(&frame, chunk_size),
                AssemblerState::Exception {
                    function: 0x03,
                    code: 0x02
                }
            );
        }
    }

    #[test]
    fn test_zero_byte_count() {
        let frame = response_frame(1, &[]);
        assert_eq!(frame.len(), 5);
        assert_eq!(feed_in_chunks(&frame, 2), AssemblerState::Complete(vec![]));
    }

    #[test]
    fn test_odd_byte_count_ignores_trailing_byte() {
        let mut frame = vec![0x01, 0x03, 0x03, 0x12, 0x34, 0x56];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        assert_eq!(feed_in_chunks(&frame, 3), AssemblerState::Complete(vec![0x1234]));
    }
}
