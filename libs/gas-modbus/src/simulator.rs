//! In-memory gas analyzer
//!
//! Answers FC03 requests from a register map the way a real slave does:
//! request CRC checked, requests for other addresses ignored, unmapped
//! registers answered with an Illegal Data Address exception. Faults
//! (silence, corrupted CRC, split delivery) can be injected for testing
//! the master without hardware.

use crate::codec::encode_float32;
use crate::constants::{EXCEPTION_BIT, FC_READ_HOLDING_REGISTERS, READ_REQUEST_LEN};
use crate::crc::crc16;
use crate::error::{ModbusError, Result};
use crate::frame::Frame;
use crate::transport::SerialTransport;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// FC03 allows at most 125 registers per request
const MAX_READ_QUANTITY: u16 = 125;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

#[derive(Debug)]
pub struct SimulatedAnalyzer {
    slave_id: u8,
    registers: HashMap<u16, u16>,
    outbox: VecDeque<Vec<u8>>,
    open: bool,
    silent: bool,
    drop_responses: usize,
    corrupt_responses: usize,
    chunk_size: Option<usize>,
    requests: usize,
}

impl SimulatedAnalyzer {
    pub fn new(slave_id: u8) -> Self {
        Self {
            slave_id,
            registers: HashMap::new(),
            outbox: VecDeque::new(),
            open: true,
            silent: false,
            drop_responses: 0,
            corrupt_responses: 0,
            chunk_size: None,
            requests: 0,
        }
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn set_register(&mut self, address: u16, value: u16) {
        self.registers.insert(address, value);
    }

    /// Store `value` as float32 in `address` and `address + 1`
    pub fn set_float(&mut self, address: u16, value: f32) {
        let [hi, lo] = encode_float32(value);
        self.registers.insert(address, hi);
        self.registers.insert(address.wrapping_add(1), lo);
    }

    /// Never answer anything
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Ignore the next `count` requests
    pub fn drop_next_responses(&mut self, count: usize) {
        self.drop_responses = count;
    }

    /// Flip the CRC of the next `count` responses
    pub fn corrupt_next_responses(&mut self, count: usize) {
        self.corrupt_responses = count;
    }

    /// Deliver responses in chunks of at most `size` bytes
    pub fn set_chunk_size(&mut self, size: Option<usize>) {
        self.chunk_size = size.filter(|s| *s > 0);
    }

    /// Simulate unplugging the device
    pub fn close(&mut self) {
        self.open = false;
        self.outbox.clear();
    }

    /// Queue raw bytes as if they had arrived on the line
    pub fn inject(&mut self, bytes: &[u8]) {
        self.outbox.push_back(bytes.to_vec());
    }

    /// Requests received so far, valid or not
    pub fn request_count(&self) -> usize {
        self.requests
    }

    fn respond(&self, request: &[u8]) -> Option<Frame> {
        if request.len() != READ_REQUEST_LEN {
            trace!("SIM: ignoring {}B request", request.len());
            return None;
        }
        let received = u16::from_le_bytes([request[6], request[7]]);
        if crc16(&request[..6]) != received {
            trace!("SIM: ignoring request with bad CRC");
            return None;
        }
        if request[0] != self.slave_id {
            return None;
        }

        let function = request[1];
        if function != FC_READ_HOLDING_REGISTERS {
            return Some(self.exception(function, ILLEGAL_FUNCTION));
        }

        let start = u16::from_be_bytes([request[2], request[3]]);
        let quantity = u16::from_be_bytes([request[4], request[5]]);
        if quantity == 0 || quantity > MAX_READ_QUANTITY {
            return Some(self.exception(function, ILLEGAL_DATA_VALUE));
        }

        let mut payload = Vec::with_capacity(1 + quantity as usize * 2);
        payload.push((quantity * 2) as u8);
        for offset in 0..quantity {
            let Some(value) = start
                .checked_add(offset)
                .and_then(|addr| self.registers.get(&addr))
            else {
                return Some(self.exception(function, ILLEGAL_DATA_ADDRESS));
            };
            payload.extend_from_slice(&value.to_be_bytes());
        }

        Some(Frame::with_crc(self.slave_id, function, &payload))
    }

    fn exception(&self, function: u8, code: u8) -> Frame {
        Frame::with_crc(self.slave_id, function | EXCEPTION_BIT, &[code])
    }
}

#[async_trait]
impl SerialTransport for SimulatedAnalyzer {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        if !self.open {
            return Err(ModbusError::TransportClosed);
        }
        self.requests += 1;

        if self.silent {
            return Ok(());
        }
        if self.drop_responses > 0 {
            self.drop_responses -= 1;
            debug!("SIM: dropping response");
            return Ok(());
        }

        let Some(response) = self.respond(frame) else {
            return Ok(());
        };
        let mut bytes = response.as_bytes().to_vec();
        if self.corrupt_responses > 0 {
            self.corrupt_responses -= 1;
            if let Some(last) = bytes.last_mut() {
                *last ^= 0xFF;
            }
            debug!("SIM: corrupting response CRC");
        }

        match self.chunk_size {
            Some(size) => self
                .outbox
                .extend(bytes.chunks(size).map(<[u8]>::to_vec)),
            None => self.outbox.push_back(bytes),
        }
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        if !self.open {
            return Err(ModbusError::TransportClosed);
        }
        match self.outbox.pop_front() {
            Some(chunk) => Ok(chunk),
            // A silent slave: the caller's deadline decides
            None => std::future::pending().await,
        }
    }

    async fn discard_input(&mut self) -> Result<usize> {
        let purged = self.outbox.drain(..).map(|chunk| chunk.len()).sum();
        Ok(purged)
    }
}
