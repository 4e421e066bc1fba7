//! RTU master: one outstanding transaction per serial channel
//!
//! The transport sits behind a single-permit lock. A call that finds the
//! lock taken fails with `ChannelBusy` instead of queueing, and never touches
//! the wire. The permit is held from the request write until the pending
//! transaction resolves, then released on drop whatever the outcome.

use crate::constants::DEFAULT_TIMEOUT_MS;
use crate::error::{ModbusError, Result};
use crate::frame::build_read_holding_registers_frame;
use crate::transaction::PendingTransaction;
use crate::transport::SerialTransport;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Modbus RTU master bound to one serial channel
pub struct RtuMaster<T: SerialTransport> {
    transport: Mutex<T>,
    timeout: Duration,
}

impl<T: SerialTransport> std::fmt::Debug for RtuMaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuMaster")
            .field("timeout", &self.timeout)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl<T: SerialTransport> RtuMaster<T> {
    /// Master with the default 5 s transaction timeout
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a transaction is currently outstanding
    pub fn is_busy(&self) -> bool {
        self.transport.try_lock().is_err()
    }

    /// Whether the line is usable; a busy line counts as open
    pub fn is_open(&self) -> bool {
        self.transport
            .try_lock()
            .map_or(true, |transport| transport.is_open())
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport.into_inner()
    }

    /// Read `quantity` holding registers starting at `start_address`
    pub async fn read_holding_registers(
        &self,
        slave_id: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        self.read_holding_registers_with_timeout(slave_id, start_address, quantity, self.timeout)
            .await
    }

    /// Same as [`read_holding_registers`](Self::read_holding_registers) with an explicit deadline
    pub async fn read_holding_registers_with_timeout(
        &self,
        slave_id: u8,
        start_address: u16,
        quantity: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>> {
        let request = build_read_holding_registers_frame(slave_id, start_address, quantity)?;

        let mut transport = self
            .transport
            .try_lock()
            .map_err(|_| ModbusError::ChannelBusy)?;

        if !transport.is_open() {
            return Err(ModbusError::TransportClosed);
        }

        let stale = transport.discard_input().await?;
        if stale > 0 {
            debug!("RTU purge: {}B stale input", stale);
        }

        debug!("RTU TX: {}", hex::encode_upper(request.as_bytes()));
        transport.write(request.as_bytes()).await?;

        let mut txn = PendingTransaction::new(&request, quantity);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;

                () = &mut deadline => {
                    if let Some(outcome) = txn.on_timeout(timeout) {
                        break outcome;
                    }
                }
                chunk = transport.read_chunk() => {
                    let chunk = match chunk {
                        Ok(chunk) if chunk.is_empty() => break Err(ModbusError::TransportClosed),
                        Ok(chunk) => chunk,
                        Err(e) => break Err(e),
                    };
                    trace!("RTU RX: {}", hex::encode_upper(&chunk));
                    if let Some(outcome) = txn.on_data(&chunk) {
                        break outcome;
                    }
                }
            }
        };

        match &outcome {
            Ok(registers) => debug!(
                "RTU slave {} FC03 @{}: {} regs in {}ms",
                slave_id,
                start_address,
                registers.len(),
                txn.elapsed().as_millis()
            ),
            Err(e) => debug!("RTU slave {} FC03 @{}: {}", slave_id, start_address, e),
        }

        outcome
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::sync::mpsc;

    /// Transport fed from a channel; records every write
    struct ScriptedTransport {
        open: bool,
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    #[async_trait]
    impl SerialTransport for ScriptedTransport {
        fn is_open(&self) -> bool {
            self.open
        }

        async fn write(&mut self, frame: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        async fn read_chunk(&mut self) -> Result<Vec<u8>> {
            Ok(self.rx.recv().await.unwrap_or_default())
        }

        async fn discard_input(&mut self) -> Result<usize> {
            let mut purged = 0;
            while let Ok(chunk) = self.rx.try_recv() {
                purged += chunk.len();
            }
            Ok(purged)
        }
    }

    fn scripted() -> (
        ScriptedTransport,
        mpsc::UnboundedSender<Vec<u8>>,
        Arc<StdMutex<Vec<Vec<u8>>>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let transport = ScriptedTransport {
            open: true,
            writes: Arc::clone(&writes),
            rx,
        };
        (transport, tx, writes)
    }

    const RESPONSE: [u8; 9] = [0x01, 0x03, 0x04, 0x41, 0xA0, 0x00, 0x00, 0xEE, 0x2D];

    #[tokio::test]
    async fn test_read_writes_request_and_returns_registers() {
        let (transport, tx, writes) = scripted();
        let master = RtuMaster::new(transport);

        // Leftovers from an earlier exchange are purged before the write
        tx.send(vec![0x01, 0x03, 0x04, 0xFF]).unwrap();

        let read = master.read_holding_registers(1, 4, 2);
        let feed = async {
            tokio::task::yield_now().await;
            tx.send(RESPONSE[..5].to_vec()).unwrap();
            tx.send(RESPONSE[5..].to_vec()).unwrap();
        };
        let (result, ()) = tokio::join!(read, feed);

        assert_eq!(result.unwrap(), vec![0x41A0, 0x0000]);
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0],
            vec![0x01, 0x03, 0x00, 0x04, 0x00, 0x02, 0x85, 0xCA]
        );
    }

    #[tokio::test]
    async fn test_invalid_argument_writes_nothing() {
        let (transport, _tx, writes) = scripted();
        let master = RtuMaster::new(transport);

        let err = master.read_holding_registers(0, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
        let err = master.read_holding_registers(1, 0, 0).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_fails_immediately() {
        let (mut transport, _tx, writes) = scripted();
        transport.open = false;
        let master = RtuMaster::new(transport);

        let err = master.read_holding_registers(1, 4, 2).await.unwrap_err();
        assert_eq!(err, ModbusError::TransportClosed);
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_transport_closed() {
        let (transport, tx, _writes) = scripted();
        let master = RtuMaster::new(transport);
        drop(tx);

        let err = master.read_holding_registers(1, 4, 2).await.unwrap_err();
        assert_eq!(err, ModbusError::TransportClosed);
        assert!(!master.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_channel() {
        let (transport, _tx, _writes) = scripted();
        let master = RtuMaster::new(transport).with_timeout(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        let err = master.read_holding_registers(1, 4, 2).await.unwrap_err();
        assert_eq!(err, ModbusError::Timeout(Duration::from_millis(250)));
        assert_eq!(started.elapsed(), Duration::from_millis(250));
        assert!(!master.is_busy());
    }

    #[tokio::test]
    async fn test_busy_while_lock_held() {
        let (transport, _tx, writes) = scripted();
        let master = RtuMaster::new(transport);

        let _guard = master.transport.try_lock().unwrap();
        assert!(master.is_busy());
        let err = master.read_holding_registers(1, 4, 2).await.unwrap_err();
        assert_eq!(err, ModbusError::ChannelBusy);
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_open_follows_transport() {
        let (transport, _tx, _writes) = scripted();
        let master = RtuMaster::new(transport);
        assert!(master.is_open());

        let guard = master.transport.try_lock().unwrap();
        assert!(master.is_open());
        drop(guard);

        master.transport.lock().await.open = false;
        assert!(!master.is_open());
    }

    #[test]
    fn test_default_timeout() {
        let (transport, _tx, _writes) = scripted();
        let master = RtuMaster::new(transport);
        assert_eq!(master.timeout(), Duration::from_millis(5000));
    }
}
