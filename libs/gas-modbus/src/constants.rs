//! Modbus RTU constants used by the master

/// Read Holding Registers function code
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Exception responses echo the function code with the high bit set
pub const EXCEPTION_BIT: u8 = 0x80;

/// Valid unicast slave address range
pub const MIN_SLAVE_ID: u8 = 1;
pub const MAX_SLAVE_ID: u8 = 247;

/// FC03 request: addr + fc + start(2) + qty(2) + crc(2)
pub const READ_REQUEST_LEN: usize = 8;

/// Bytes needed before the byte-count field decides the frame length
pub const MIN_RESPONSE_LEN: usize = 5;

/// Normal response header: addr + fc + byte count
pub const RESPONSE_HEADER_LEN: usize = 3;

pub const CRC_LEN: usize = 2;

/// Exception response: addr + fc|0x80 + code + crc(2)
pub const EXCEPTION_RESPONSE_LEN: usize = 5;

/// Default transaction timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Analyzer turnaround between consecutive requests in milliseconds
pub const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 200;

/// Read buffer size for a single serial read
pub const READ_CHUNK_SIZE: usize = 256;

/// Get exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
