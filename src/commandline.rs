use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use forcemeter_lib::{protocol as proto, transport::Parity};
use std::{path::PathBuf, time::Duration};

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM3")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_slave_address(s: &str) -> Result<proto::SlaveAddress, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    proto::SlaveAddress::try_from(address_val).map_err(|e| e.to_string())
}

fn parse_register(s: &str) -> Result<u32, String> {
    clap_num::maybe_hex::<u32>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val)
}

fn parse_scale(s: &str) -> Result<proto::ScaleFactor, String> {
    let scale_val = s
        .parse::<f64>()
        .map_err(|e| format!("Invalid scale factor format: {e}"))?;
    proto::ScaleFactor::try_from(scale_val).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Connect to a force meter via Modbus RTU (Serial).
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_device_name(), verbatim_doc_comment)]
        device: String,

        /// Baud rate for serial communication.
        /// Must match the device's configured baud rate.
        /// Supported values: 9600, 19200, 38400, 57600, 115200.
        #[arg(long, default_value_t = proto::BaudRate::default(), value_parser = parse_baud_rate, verbatim_doc_comment)]
        baud_rate: proto::BaudRate,

        /// Number of data bits (7 or 8).
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(7..=8))]
        data_bits: u8,

        /// Parity: none, odd or even.
        #[arg(long, default_value_t = Parity::None)]
        parity: Parity,

        /// Number of stop bits (1 or 2).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
        stop_bits: u8,

        /// The Modbus RTU device address.
        /// Must be unique on the RS485 bus, ranging from 1 to 247.
        #[arg(short, long, default_value_t = proto::SlaveAddress::default(), value_parser = parse_slave_address, verbatim_doc_comment)]
        address: proto::SlaveAddress,

        /// Interpret register addresses in PLC notation, e.g. 40016 for register 16.
        #[arg(long)]
        plc: bool,

        /// RTU-specific commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
    /// Poll a force meter as described by a YAML configuration file.
    Config {
        /// The configuration file.
        #[arg(short, long, default_value = crate::config::DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
}

/// Addresses and interpretation of a batch read.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct BatchArgs {
    /// Up to 8 register addresses, each the start of a 32-bit value.
    /// `0` marks an unused slot and is skipped.
    /// Can be specified in decimal or hexadecimal (e.g., "0x07D0").
    #[arg(value_parser = parse_register, num_args = 1..=8, default_values_t = [2000, 2002, 2004, 2006], verbatim_doc_comment)]
    pub addresses: Vec<u32>,

    /// Multiplier applied to every decoded value.
    #[arg(short, long, default_value_t = proto::ScaleFactor::default(), value_parser = parse_scale)]
    pub scale: proto::ScaleFactor,

    /// Interpretation of the register pair: float, signed or unsigned.
    #[arg(short, long, default_value_t = proto::ValueFormat::Float)]
    pub format: proto::ValueFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read up to 8 addresses, one request each, and print the scaled values.
    Read {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Read COUNT consecutive 32-bit values with a single request.
    /// Every value is printed as hex, signed long and float.
    #[clap(verbatim_doc_comment)]
    ReadBlock {
        /// First register address.
        #[arg(value_parser = parse_register)]
        start: u32,
        /// Number of 32-bit values (each occupies two registers).
        #[arg(value_parser = clap::value_parser!(u16).range(1..=proto::MAX_VALUES_PER_REQUEST as i64))]
        count: u16,
    },

    /// Write one 32-bit value to two consecutive registers.
    /// The value is sent as given; no scale factor is applied.
    #[clap(verbatim_doc_comment)]
    Write {
        /// Register address of the high word.
        #[arg(value_parser = parse_register)]
        address: u32,
        /// The value to write, e.g. "500.0" or "-12".
        #[arg(allow_hyphen_values = true)]
        value: String,
        /// Interpretation of the value: float, signed or unsigned.
        #[arg(short, long, default_value_t = proto::ValueFormat::Float)]
        format: proto::ValueFormat,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Run in daemon mode: continuously read the addresses at a specified interval.
    Daemon {
        /// Interval for reading values (e.g., "1s", "500ms")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "1s")]
        poll_interval: Duration,

        #[command(flatten)]
        batch: BatchArgs,
    },
}

const fn about_text() -> &'static str {
    "Force meter CLI - Read and write 32-bit values of D505-CH4 / DY500 instruments via Modbus RTU."
}

#[derive(Parser, Debug)]
#[command(name="forcemeter", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug (frames in hex), -vvv for trace. Default is warnings.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection method and device-specific commands.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Time to wait for a complete response.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Minimum delay between consecutive Modbus requests.
    /// Raised to the RTU silent interval (3.5 characters) of the baud rate if lower.
    /// Examples: "5ms", "50ms".
    #[arg(global = true, long, default_value = "5ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,
}
