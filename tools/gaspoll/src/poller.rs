//! Gas channel polling
//!
//! Each configured channel is one FC03 read of two registers decoded as a
//! float32. Channels are read one after another on the same line with a
//! quiet gap in between; the master would reject overlapping reads anyway.

use crate::config::{AnalyzerConfig, ChannelConfig};
use crate::sink::ReadingSink;
use chrono::{DateTime, Utc};
use gas_modbus::{decode_float32, ModbusError, RtuMaster, SerialTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasChannel {
    O2,
    Co,
    Ch4,
    Co2,
}

impl GasChannel {
    pub const ALL: [GasChannel; 4] = [
        GasChannel::O2,
        GasChannel::Co,
        GasChannel::Ch4,
        GasChannel::Co2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GasChannel::O2 => "O2",
            GasChannel::Co => "CO",
            GasChannel::Ch4 => "CH4",
            GasChannel::Co2 => "CO2",
        }
    }
}

impl fmt::Display for GasChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One polling round; a channel that could not be read is `None`.
///
/// Non-finite values are kept and serialize as `"NaN"`, `"inf"` or `"-inf"`
/// so they stay distinct from a missing channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedReading {
    pub timestamp: DateTime<Utc>,
    /// Wall time spent on the whole round
    pub elapsed_ms: u64,
    #[serde(default, with = "concentration")]
    pub o2: Option<f32>,
    #[serde(default, with = "concentration")]
    pub co: Option<f32>,
    #[serde(default, with = "concentration")]
    pub ch4: Option<f32>,
    #[serde(default, with = "concentration")]
    pub co2: Option<f32>,
}

/// JSON has no NaN or infinity literals
mod concentration {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f32),
        Label(String),
    }

    pub fn serialize<S>(value: &Option<f32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            None => serializer.serialize_none(),
            Some(v) if v.is_finite() => serializer.serialize_some(v),
            Some(v) if v.is_nan() => serializer.serialize_some("NaN"),
            Some(v) if v.is_sign_positive() => serializer.serialize_some("inf"),
            Some(_) => serializer.serialize_some("-inf"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Label(label)) => match label.as_str() {
                "NaN" => Ok(Some(f32::NAN)),
                "inf" => Ok(Some(f32::INFINITY)),
                "-inf" => Ok(Some(f32::NEG_INFINITY)),
                other => Err(D::Error::custom(format!(
                    "invalid concentration {:?}",
                    other
                ))),
            },
        }
    }
}

impl DecodedReading {
    fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            elapsed_ms: 0,
            o2: None,
            co: None,
            ch4: None,
            co2: None,
        }
    }

    pub fn get(&self, gas: GasChannel) -> Option<f32> {
        match gas {
            GasChannel::O2 => self.o2,
            GasChannel::Co => self.co,
            GasChannel::Ch4 => self.ch4,
            GasChannel::Co2 => self.co2,
        }
    }

    fn set(&mut self, gas: GasChannel, value: f32) {
        let slot = match gas {
            GasChannel::O2 => &mut self.o2,
            GasChannel::Co => &mut self.co,
            GasChannel::Ch4 => &mut self.ch4,
            GasChannel::Co2 => &mut self.co2,
        };
        *slot = Some(value);
    }

    /// Channels that produced a value
    pub fn present(&self) -> usize {
        GasChannel::ALL
            .iter()
            .filter(|gas| self.get(**gas).is_some())
            .count()
    }
}

pub struct GasPoller<T: SerialTransport> {
    master: RtuMaster<T>,
    slave_id: u8,
    channels: Vec<ChannelConfig>,
    inter_request_delay: Duration,
    max_retries: u32,
    /// End of the most recent exchange, across rounds
    last_exchange: Mutex<Option<Instant>>,
}

impl<T: SerialTransport> GasPoller<T> {
    pub fn new(master: RtuMaster<T>, config: &AnalyzerConfig) -> Self {
        Self {
            master,
            slave_id: config.slave_id,
            channels: config.channels.clone(),
            inter_request_delay: config.inter_request_delay(),
            max_retries: config.max_retries,
            last_exchange: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn into_master(self) -> RtuMaster<T> {
        self.master
    }

    /// Read every configured channel once.
    ///
    /// Per-channel protocol failures leave that channel empty. Failures of
    /// the line itself abort the round.
    pub async fn poll_once(&self) -> Result<DecodedReading, ModbusError> {
        let started = Instant::now();
        let mut reading = DecodedReading::empty(Utc::now());

        for channel in &self.channels {
            match self.read_channel(channel).await {
                Ok(value) => {
                    if !value.is_finite() {
                        warn!(
                            "{} @{}: non-finite value {}",
                            channel.gas, channel.address, value
                        );
                    }
                    reading.set(channel.gas, value);
                },
                Err(e) if e.needs_reconnect() => return Err(e),
                Err(e) => warn!("{} @{}: {}", channel.gas, channel.address, e),
            }
        }

        reading.elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Poll: {}/{} channels in {}ms",
            reading.present(),
            self.channels.len(),
            reading.elapsed_ms
        );
        Ok(reading)
    }

    /// The analyzer needs a quiet gap after every response, including the
    /// last one of the previous round
    async fn wait_for_turnaround(&self) {
        let last = *self.last_exchange.lock().await;
        if let Some(last) = last {
            tokio::time::sleep_until(last + self.inter_request_delay).await;
        }
    }

    async fn read_channel(&self, channel: &ChannelConfig) -> Result<f32, ModbusError> {
        let mut attempt = 0;
        loop {
            self.wait_for_turnaround().await;
            let result = self
                .master
                .read_holding_registers(self.slave_id, channel.address, 2)
                .await;
            *self.last_exchange.lock().await = Some(Instant::now());

            match result {
                Ok(registers) => {
                    return match registers.as_slice() {
                        [hi, lo, ..] => Ok(decode_float32([*hi, *lo])),
                        _ => Err(ModbusError::unexpected_response(format!(
                            "{} registers where 2 were requested",
                            registers.len()
                        ))),
                    };
                },
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(
                        "{} retry {}/{}: {}",
                        channel.gas, attempt, self.max_retries, e
                    );
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll every `interval` until `shutdown` turns true, delivering each
    /// reading to `sink`.
    ///
    /// A failed round is logged and skipped. Polling only gives up early once
    /// the line is closed for good, returning `TransportClosed`.
    pub async fn run<S: ReadingSink + ?Sized>(
        &self,
        sink: &mut S,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, ModbusError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds = 0u64;
        let mut line_lost = false;

        info!(
            "Polling slave {} every {}ms: {}",
            self.slave_id,
            interval.as_millis(),
            self.channels
                .iter()
                .map(|c| c.gas.name())
                .collect::<Vec<_>>()
                .join(",")
        );

        loop {
            tokio::select! {
                _ = common::shutdown::shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => match self.poll_once().await {
                    Ok(reading) => {
                        rounds += 1;
                        if let Err(e) = sink.deliver(&reading).await {
                            warn!("Sink: {:#}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Round failed: {}", e);
                        if !self.master.is_open() {
                            error!("Serial line closed");
                            line_lost = true;
                            break;
                        }
                    },
                },
            }
        }

        info!("Polling stopped after {} rounds", rounds);
        if line_lost {
            return Err(ModbusError::TransportClosed);
        }
        Ok(rounds)
    }
}
