//! Gas Analyzer Modbus RTU Master
//!
//! Transaction engine used to poll a gas analyzer over a serial line with
//! Modbus RTU "Read Holding Registers" (FC03).
//!
//! # Architecture
//!
//! ```text
//! gas-modbus
//!     ├── crc        (CRC-16/MODBUS)
//!     ├── frame      (FC03 request frame builder)
//!     ├── assembler  (response accumulation / CRC validation)
//!     ├── transaction(one in-flight request, resolves exactly once)
//!     ├── master     (RtuMaster: single-permit channel coordinator)
//!     ├── codec      (register → f32 decoding)
//!     ├── transport  (SerialTransport trait, tokio-serial implementation)
//!     └── simulator  (in-memory analyzer answering FC03)
//! ```
//!
//! The master only returns raw registers; register-address-specific
//! decoding belongs to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use gas_modbus::{decode_float32, RtuMaster, SerialParams, SerialPortTransport};
//!
//! # async fn run() -> gas_modbus::Result<()> {
//! let transport = SerialPortTransport::open(&SerialParams::new("/dev/ttyUSB0", 9600))?;
//! let master = RtuMaster::new(transport);
//! let regs = master.read_holding_registers(1, 4, 2).await?;
//! let o2 = decode_float32([regs[0], regs[1]]);
//! # let _ = o2;
//! # Ok(())
//! # }
//! ```

mod assembler;
mod codec;
mod constants;
mod crc;
mod error;
mod frame;
mod master;
mod simulator;
mod transaction;
mod transport;

pub use assembler::{AssemblerState, ResponseAccumulator};
pub use codec::{decode_float32, decode_float32_at, encode_float32};
pub use constants::{
    exception_description, DEFAULT_INTER_REQUEST_DELAY_MS, DEFAULT_TIMEOUT_MS,
    FC_READ_HOLDING_REGISTERS, MAX_SLAVE_ID, MIN_RESPONSE_LEN, MIN_SLAVE_ID,
    READ_REQUEST_LEN,
};
pub use crc::crc16;
pub use error::{ModbusError, Result};
pub use frame::{build_read_holding_registers_frame, Frame};
pub use master::RtuMaster;
pub use simulator::SimulatedAnalyzer;
pub use transaction::{PendingTransaction, TransactionOutcome};
pub use transport::{Parity, SerialParams, SerialPortTransport, SerialTransport};
