//! Single in-flight request state machine
//!
//! One `PendingTransaction` is created per request and dropped when the
//! request resolves. It owns the response buffer, so nothing survives into
//! the next transaction. After the first resolution every further event is
//! ignored.

use crate::assembler::{AssemblerState, ResponseAccumulator};
use crate::error::{ModbusError, Result};
use crate::frame::Frame;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Final result of a transaction
pub type TransactionOutcome = Result<Vec<u16>>;

#[derive(Debug)]
pub struct PendingTransaction {
    slave_id: u8,
    function_code: u8,
    quantity: u16,
    created_at: Instant,
    /// `None` once resolved
    accumulator: Option<ResponseAccumulator>,
}

impl PendingTransaction {
    /// Track the response to `request`, which asks for `quantity` registers
    pub fn new(request: &Frame, quantity: u16) -> Self {
        Self {
            slave_id: request.slave_id(),
            function_code: request.function_code(),
            quantity,
            created_at: Instant::now(),
            accumulator: Some(ResponseAccumulator::new()),
        }
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    pub fn quantity(&self) -> u16 {
        self.quantity
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_resolved(&self) -> bool {
        self.accumulator.is_none()
    }

    /// Feed a chunk read from the transport.
    ///
    /// Returns `Some` exactly once, when the chunk completes (or breaks) the
    /// response. Bytes arriving after resolution are ignored.
    pub fn on_data(&mut self, chunk: &[u8]) -> Option<TransactionOutcome> {
        let accumulator = self.accumulator.as_mut()?;
        let state = accumulator.feed(chunk);
        if !state.is_terminal() {
            return None;
        }

        let slave_id = accumulator.slave_id();
        let function_code = accumulator.function_code().unwrap_or(0);
        self.accumulator = None;

        let outcome = match state {
            AssemblerState::Incomplete { .. } => return None,
            AssemblerState::ChecksumMismatch { expected, received } => {
                Err(ModbusError::CrcMismatch { expected, received })
            },
            AssemblerState::Exception { function, code } => self
                .check_header(slave_id, function)
                .and(Err(ModbusError::Exception { function, code })),
            AssemblerState::Complete(registers) => {
                self.check_header(slave_id, function_code).map(|()| {
                    if registers.len() != self.quantity as usize {
                        debug!(
                            "RTU slave {} returned {} registers, requested {}",
                            self.slave_id,
                            registers.len(),
                            self.quantity
                        );
                    }
                    registers
                })
            },
        };

        Some(outcome)
    }

    /// Deadline expired; resolves with `Timeout` unless already resolved
    pub fn on_timeout(&mut self, timeout: Duration) -> Option<TransactionOutcome> {
        let accumulator = self.accumulator.take()?;
        if !accumulator.buffered().is_empty() {
            debug!(
                "RTU timeout with {}B partial frame: {}",
                accumulator.buffered().len(),
                hex::encode_upper(accumulator.buffered())
            );
        }
        Some(Err(ModbusError::Timeout(timeout)))
    }

    /// Responses are matched by adjacency, so at least the header must agree
    fn check_header(&self, slave_id: Option<u8>, function_code: u8) -> Result<()> {
        let slave_id = slave_id.unwrap_or(0);
        if slave_id != self.slave_id {
            return Err(ModbusError::unexpected_response(format!(
                "slave {} answered request for slave {}",
                slave_id, self.slave_id
            )));
        }
        if function_code != self.function_code {
            return Err(ModbusError::unexpected_response(format!(
                "function code {:02X} in response to FC{:02X}",
                function_code, self.function_code
            )));
        }
        Ok(())
    }
}
