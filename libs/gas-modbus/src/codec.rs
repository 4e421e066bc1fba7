//! Register value decoding
//!
//! The analyzer publishes each gas concentration as an IEEE-754 float32
//! spread over two holding registers, high word first (ABCD order).

/// Convert 2 u16 registers to f32 (big-endian word and byte order).
///
/// Never fails: NaN and infinities are passed through unchanged.
pub fn decode_float32(registers: [u16; 2]) -> f32 {
    let [h0, h1] = [registers[0].to_be_bytes(), registers[1].to_be_bytes()];
    f32::from_be_bytes([h0[0], h0[1], h1[0], h1[1]])
}

/// Decode the float32 starting at `offset` in a register block
pub fn decode_float32_at(registers: &[u16], offset: usize) -> Option<f32> {
    match registers.get(offset..offset + 2) {
        Some(&[hi, lo]) => Some(decode_float32([hi, lo])),
        _ => None,
    }
}

/// Split an f32 into two registers, high word first
pub fn encode_float32(value: f32) -> [u16; 2] {
    let bytes = value.to_be_bytes();
    [
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_float32_exact() {
        assert_eq!(decode_float32([0x41A0, 0x0000]), 20.0);
        assert_eq!(decode_float32([0x3F80, 0x0000]), 1.0);
        assert_eq!(decode_float32([0xC2F6, 0xE979]), -123.456);
        assert_eq!(decode_float32([0x0000, 0x0000]), 0.0);
    }

    #[test]
    fn test_decode_float32_passes_through_non_finite() {
        assert!(decode_float32([0x7FC0, 0x0000]).is_nan());
        assert_eq!(decode_float32([0x7F80, 0x0000]), f32::INFINITY);
        assert_eq!(decode_float32([0xFF80, 0x0000]), f32::NEG_INFINITY);
    }

    #[test]
    fn test_decode_float32_word_order_matters() {
        // Swapped words (CDAB) do not decode to the same value
        assert_ne!(decode_float32([0x0000, 0x41A0]), 20.0);
    }

    #[test]
    fn test_decode_float32_at() {
        let block = [0x3F80, 0x0000, 0x41A0, 0x0000];
        assert_eq!(decode_float32_at(&block, 0), Some(1.0));
        assert_eq!(decode_float32_at(&block, 2), Some(20.0));
        assert_eq!(decode_float32_at(&block, 3), None);
        assert_eq!(decode_float32_at(&[], 0), None);
    }

    #[test]
    fn test_encode_float32() {
        assert_eq!(encode_float32(20.0), [0x41A0, 0x0000]);
        assert_eq!(encode_float32(20.9), [0x41A7, 0x3333]);
    }
}
