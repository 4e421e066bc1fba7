//! gaspoll configuration
//!
//! Loaded from `config/gaspoll.yaml` with `GASPOLL_` environment overrides,
//! e.g. `GASPOLL_SERIAL__DEVICE=/dev/ttyS1` or `GASPOLL_SLAVE_ID=3`.

use crate::poller::GasChannel;
use anyhow::{bail, Context, Result};
use common::LogConfig;
use gas_modbus::{
    SerialParams, DEFAULT_INTER_REQUEST_DELAY_MS, DEFAULT_TIMEOUT_MS, MAX_SLAVE_ID, MIN_SLAVE_ID,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "GASPOLL_";
pub const DEFAULT_CONFIG_PATH: &str = "config/gaspoll.yaml";

/// Where one gas concentration lives in the analyzer's register map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub gas: GasChannel,
    /// First of the two holding registers carrying the float32
    pub address: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    /// One structured log line per reading
    #[default]
    Log,
    /// Append one JSON object per line
    JsonLines { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub serial: SerialParams,
    pub slave_id: u8,
    /// Per-transaction deadline
    pub timeout_ms: u64,
    /// Quiet time between consecutive requests on the line
    pub inter_request_delay_ms: u64,
    /// Time between the starts of two full polling rounds
    pub poll_interval_ms: u64,
    /// Extra attempts for a channel after a timeout or CRC failure
    pub max_retries: u32,
    pub channels: Vec<ChannelConfig>,
    pub output: OutputConfig,
    pub logging: LogConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            serial: SerialParams::new("/dev/ttyUSB0", 9600),
            slave_id: 1,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            inter_request_delay_ms: DEFAULT_INTER_REQUEST_DELAY_MS,
            poll_interval_ms: 5000,
            max_retries: 1,
            channels: default_channels(),
            output: OutputConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// O2, CO, CH4, CO2 as consecutive float32 pairs from register 0
fn default_channels() -> Vec<ChannelConfig> {
    GasChannel::ALL
        .iter()
        .zip((0u16..).step_by(2))
        .map(|(gas, address)| ChannelConfig {
            gas: *gas,
            address,
        })
        .collect()
}

impl AnalyzerConfig {
    /// Load from `path` (defaults if missing) and the environment, then validate
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = common::load_config(path, ENV_PREFIX)
            .with_context(|| format!("loading {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&self.slave_id) {
            bail!(
                "slave_id {} out of range {}-{}",
                self.slave_id,
                MIN_SLAVE_ID,
                MAX_SLAVE_ID
            );
        }
        if self.serial.device.trim().is_empty() {
            bail!("serial.device must not be empty");
        }
        if self.serial.baud_rate == 0 {
            bail!("serial.baud_rate must be positive");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be positive");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if self.channels.is_empty() {
            bail!("at least one channel must be configured");
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.gas) {
                bail!("channel {} configured more than once", channel.gas);
            }
            if channel.address == u16::MAX {
                bail!(
                    "channel {} address {} has no room for a float32",
                    channel.gas,
                    channel.address
                );
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
