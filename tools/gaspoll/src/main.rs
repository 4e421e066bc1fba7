//! gaspoll - Modbus RTU gas analyzer poller
//!
//! Reads O2, CO, CH4 and CO2 concentrations from a serial gas analyzer and
//! hands each polling round to a sink.

mod config;
mod poller;
mod sink;

use crate::config::{AnalyzerConfig, DEFAULT_CONFIG_PATH};
use crate::poller::{GasChannel, GasPoller};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use common::LogConfig;
use gas_modbus::{
    decode_float32, RtuMaster, SerialPortTransport, SerialTransport, SimulatedAnalyzer,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "gaspoll")]
#[command(about = "Poll a serial gas analyzer over Modbus RTU")]
#[command(long_about = "Poll a serial gas analyzer over Modbus RTU

Examples:
  gaspoll poll                                  # Poll until Ctrl+C
  gaspoll once --simulate                       # One round against the built-in simulator
  gaspoll read --start 4 --quantity 2           # Raw FC03 read
  GASPOLL_SERIAL__DEVICE=/dev/ttyS1 gaspoll poll")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Talk to an in-memory analyzer instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Log filter, overrides the configured level (RUST_LOG still wins)
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll all configured channels until interrupted
    Poll,

    /// Poll all configured channels once and print the reading as JSON
    Once,

    /// Issue a single Read Holding Registers request
    Read {
        /// Slave address (default: configured slave_id)
        #[arg(short, long)]
        slave: Option<u8>,

        /// First register address
        #[arg(long)]
        start: u16,

        /// Number of registers
        #[arg(short, long, default_value_t = 2)]
        quantity: u16,

        /// Transaction timeout (default: configured timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // The configured logger is only known once the config is loaded
    let startup_log = common::logging::init_startup(&LogConfig {
        level: cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
        ansi: !cli.no_color,
        ..Default::default()
    })
    .context("initializing logging")?;
    let mut config = AnalyzerConfig::load(&cli.config)?;
    drop(startup_log);

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.no_color {
        config.logging.ansi = false;
    }
    common::logging::init_with_config(&config.logging).context("initializing logging")?;

    if cli.simulate {
        info!("Using simulated analyzer (slave {})", config.slave_id);
        execute(cli.command, &config, simulated_analyzer(&config)).await
    } else {
        let transport = SerialPortTransport::open(&config.serial)
            .with_context(|| format!("opening {}", config.serial.device))?;
        execute(cli.command, &config, transport).await
    }
}

async fn execute<T: SerialTransport>(
    command: Commands,
    config: &AnalyzerConfig,
    transport: T,
) -> Result<()> {
    let master = RtuMaster::new(transport).with_timeout(config.timeout());

    match command {
        Commands::Poll => {
            let poller = GasPoller::new(master, config);
            let mut sink = sink::from_config(&config.output).await?;
            let shutdown = common::shutdown::shutdown_channel();
            let rounds = poller
                .run(sink.as_mut(), config.poll_interval(), shutdown)
                .await
                .context("polling stopped")?;
            info!("{} polling rounds completed", rounds);
        },
        Commands::Once => {
            let poller = GasPoller::new(master, config);
            let reading = poller.poll_once().await.context("polling")?;
            println!("{}", serde_json::to_string_pretty(&reading)?);
        },
        Commands::Read {
            slave,
            start,
            quantity,
            timeout_ms,
        } => {
            let slave = slave.unwrap_or(config.slave_id);
            let timeout = timeout_ms.map_or(config.timeout(), Duration::from_millis);
            let registers = master
                .read_holding_registers_with_timeout(slave, start, quantity, timeout)
                .await
                .with_context(|| format!("reading slave {} @{}", slave, start))?;
            print_registers(start, &registers);
        },
    }
    Ok(())
}

fn print_registers(start: u16, registers: &[u16]) {
    println!("{}", format!("{:>7}  {:>6}  {:>5}", "address", "hex", "dec").bold());
    for (offset, value) in registers.iter().enumerate() {
        println!(
            "{:>7}  0x{:04X}  {:>5}",
            u32::from(start) + offset as u32,
            value,
            value
        );
    }
    if let [hi, lo] = registers {
        println!("{} {}", "float32:".green(), decode_float32([*hi, *lo]));
    }
}

/// Representative ambient-air values
fn nominal_value(gas: GasChannel) -> f32 {
    match gas {
        GasChannel::O2 => 20.9,
        GasChannel::Co => 12.5,
        GasChannel::Ch4 => 0.35,
        GasChannel::Co2 => 415.0,
    }
}

fn simulated_analyzer(config: &AnalyzerConfig) -> SimulatedAnalyzer {
    let mut sim = SimulatedAnalyzer::new(config.slave_id);
    for channel in &config.channels {
        sim.set_float(channel.address, nominal_value(channel.gas));
    }
    // UART drivers rarely hand over a whole frame in one read
    sim.set_chunk_size(Some(3));
    sim
}
