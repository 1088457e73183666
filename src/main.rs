//! Force Meter CLI
//!
//! A command-line interface (CLI) application for reading and writing the
//! 32-bit values of D505-CH4 force display instruments and DY500 transmitters
//! over Modbus RTU (serial).
//!
//! This tool allows users to:
//! - Read up to 8 register addresses in one batch and print the scaled values.
//! - Read a contiguous block of values with a single request frame.
//! - Write a float, signed or unsigned 32-bit value.
//! - Run in a continuous daemon mode, either from command line arguments or
//!   from a YAML configuration file.
//!
//! The CLI leverages the `forcemeter_lib` crate for framing, validation and
//! value conversion.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use forcemeter_lib::{
    codec,
    frame::{HexBytes, ReadRequest},
    protocol::{self as proto, BatchOutcome, BatchReadSpec, Value32, ValueFormat},
    sync_client::ForceMeter,
    transport::{SerialSettings, SerialTransport},
};
use log::*;
use std::{panic, time::Duration};

mod commandline;
mod config;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Calculates the minimum silent interval of Modbus RTU for a baud rate.
///
/// This is 3.5 character times with 11 bits per character, but never less
/// than the 1.75 ms the Modbus specification fixes for rates above 19200.
fn minimum_rtu_delay(baud_rate: &proto::BaudRate) -> Duration {
    const BITS_PER_CHAR: f64 = 11.0;
    const MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;

    let rate = u32::from(*baud_rate) as f64;
    let inter_frame_delay_secs = 3.5 * BITS_PER_CHAR / rate;
    let delay_micros = (inter_frame_delay_secs * 1_000_000.0) as u64;
    Duration::from_micros(delay_micros.max(MIN_INTER_FRAME_DELAY_MICROS))
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: &proto::BaudRate) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

/// Turns a command line register argument into a register address.
///
/// `0` stays the "unused slot" sentinel in both notations.
fn resolve_register(raw: u32, plc: bool) -> Result<proto::RegisterAddress> {
    if raw == 0 {
        Ok(proto::SENTINEL_ADDRESS)
    } else if plc {
        Ok(proto::register_from_plc_notation(raw)?)
    } else {
        proto::RegisterAddress::try_from(raw)
            .with_context(|| format!("Register address {raw} exceeds 65535"))
    }
}

/// Resolves a batch address; a PLC number may not land on the unused-slot marker.
fn resolve_batch_register(raw: u32, plc: bool) -> Result<proto::RegisterAddress> {
    let address = resolve_register(raw, plc)?;
    if raw != 0 && address == proto::SENTINEL_ADDRESS {
        anyhow::bail!(
            "PLC register {raw} resolves to address {}, which marks an unused slot",
            proto::SENTINEL_ADDRESS
        );
    }
    Ok(address)
}

/// Formats a scaled reading with 5 decimals, trimming trailing zeros.
///
/// Integer readings that pass through an identity scale print as integers.
fn format_scaled(scaled: f64, format: ValueFormat, scale: &proto::ScaleFactor) -> String {
    if format != ValueFormat::Float && scale.is_identity() {
        return format!("{}", scaled as i64);
    }
    let formatted = format!("{scaled:.5}");
    match formatted.trim_end_matches('0').trim_end_matches('.') {
        "-0" => String::from("0"),
        trimmed => trimmed.to_string(),
    }
}

fn print_batch(outcome: &BatchOutcome, spec: &BatchReadSpec) {
    if outcome.is_empty() {
        println!("No address configured.");
    }
    for (address, result) in outcome {
        match result {
            Ok(reading) => println!(
                "Address {address}: {}",
                format_scaled(reading.scaled, spec.format(), &spec.scale())
            ),
            Err(error) => println!("Address {address}: {error}"),
        }
    }
}

fn open_meter(
    device: &str,
    settings: &SerialSettings,
    timeout: Duration,
    delay: Duration,
) -> Result<ForceMeter<SerialTransport>> {
    info!("Attempting to open serial port {device} ({settings})...");
    let transport = SerialTransport::open(device, settings)
        .with_context(|| format!("Cannot open serial port {device} ({settings})"))?;
    let mut meter = ForceMeter::new(transport);
    meter.set_timeout(timeout);
    meter.set_delay(check_rtu_delay(delay, &settings.baud_rate));
    Ok(meter)
}

fn run_daemon(
    meter: &mut ForceMeter<SerialTransport>,
    spec: &BatchReadSpec,
    poll_interval: Duration,
) -> Result<()> {
    info!("Starting daemon mode: interval={poll_interval:?}, spec={spec:?}");
    let mut read_count: u64 = 0;
    loop {
        read_count += 1;
        debug!("Daemon: batch read #{read_count}");
        let outcome = meter
            .read_batch(spec)
            .with_context(|| format!("Batch read #{read_count} failed"))?;
        println!("--- Read #{read_count}");
        print_batch(&outcome, spec);
        std::thread::sleep(meter.delay().max(poll_interval));
    }
}

fn handle_read_block(
    meter: &mut ForceMeter<SerialTransport>,
    request: &ReadRequest,
) -> Result<()> {
    let (start, count) = (request.start(), request.values());
    info!("Executing: Read {count} values starting at {start}");
    let payload = meter
        .read_payload(request)
        .with_context(|| format!("Cannot read {count} values at address {start}"))?;
    codec::decode_many(&payload, count as usize, ValueFormat::Unsigned)?;
    println!("{:<8} {:<12} {:>12} {:>16}", "Address", "Hex", "Long", "Float");
    for (index, chunk) in payload.chunks_exact(proto::BYTES_PER_VALUE).enumerate() {
        let address = start as usize + index * proto::REGISTERS_PER_VALUE as usize;
        let hex = HexBytes(chunk).to_string();
        let long = codec::decode_bytes(chunk, ValueFormat::Signed)?.to_string();
        let float = codec::decode_bytes(chunk, ValueFormat::Float)?.as_f64();
        println!("{address:<8} {hex:<12} {long:>12} {float:>16.6}");
    }
    Ok(())
}

fn handle_write(
    meter: &mut ForceMeter<SerialTransport>,
    slave: proto::SlaveAddress,
    address: proto::RegisterAddress,
    value: Value32,
    confirmed: bool,
) -> Result<()> {
    info!("Executing: Write {value} ({}) to address {address}", value.format());
    if !confirmed
        && !Confirm::new()
            .with_prompt(format!(
                "Write {value} ({}) to registers {address}..{} of slave {slave}?",
                value.format(),
                address as u32 + 1
            ))
            .default(false)
            .show_default(true)
            .interact()
            .context("Failed to get user confirmation.")?
    {
        info!("Write aborted by user.");
        return Ok(());
    }
    meter
        .write_value(slave, address, value)
        .with_context(|| format!("Failed to write {value} to address {address}"))?;
    println!(
        "Write succeeded: address {address}, value {value} ({})",
        HexBytes(&codec::to_bytes(value))
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Force meter CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    match &args.connection {
        // 2. Configuration file driven daemon
        commandline::CliConnection::Config { file } => {
            let config = config::Config::load(file)?;
            trace!("Config: {config:?}");
            let spec = config.batch.to_spec()?;
            let mut meter = open_meter(
                &config.serial.device,
                &config.serial.settings(),
                config.serial.timeout,
                config.serial.delay,
            )?;
            run_daemon(&mut meter, &spec, config.poll_interval)
        }
        // 3. Command line driven commands
        commandline::CliConnection::Rtu {
            device,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            address: slave,
            plc,
            command,
        } => {
            let settings = SerialSettings {
                baud_rate: *baud_rate,
                data_bits: *data_bits,
                parity: *parity,
                stop_bits: *stop_bits,
            };
            let mut meter = open_meter(device, &settings, args.timeout, args.delay)?;
            let batch_spec = |batch: &commandline::BatchArgs| -> Result<BatchReadSpec> {
                let addresses = batch
                    .addresses
                    .iter()
                    .map(|raw| resolve_batch_register(*raw, *plc))
                    .collect::<Result<Vec<_>>>()?;
                Ok(BatchReadSpec::new(
                    *slave,
                    addresses,
                    batch.scale,
                    batch.format,
                )?)
            };

            match command {
                commandline::CliCommands::Read { batch } => {
                    info!("Executing: Batch Read");
                    let spec = batch_spec(batch)?;
                    let outcome = meter.read_batch(&spec).context("Batch read failed")?;
                    print_batch(&outcome, &spec);
                }
                commandline::CliCommands::ReadBlock { start, count } => {
                    let start = resolve_register(*start, *plc)?;
                    let request = ReadRequest::block(*slave, start, *count)?;
                    handle_read_block(&mut meter, &request)?;
                }
                commandline::CliCommands::Write {
                    address,
                    value,
                    format,
                    yes,
                } => {
                    let address = resolve_register(*address, *plc)?;
                    let value = Value32::parse(value, *format).map_err(anyhow::Error::msg)?;
                    handle_write(&mut meter, *slave, address, value, *yes)?;
                }
                commandline::CliCommands::Daemon {
                    poll_interval,
                    batch,
                } => {
                    let spec = batch_spec(batch)?;
                    run_daemon(&mut meter, &spec, *poll_interval)?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_rtu_delay_calculation() {
        // 3.5 char times = 38.5 / baud
        assert_eq!(minimum_rtu_delay(&proto::BaudRate::B9600).as_micros(), 4010);
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B19200).as_micros(),
            2005
        );
        // Faster rates are clamped to 1.75 ms.
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B38400).as_micros(),
            1750
        );
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B115200).as_micros(),
            1750
        );
    }

    #[test]
    fn test_check_rtu_delay() {
        let br_9600 = proto::BaudRate::B9600;
        let min_delay_9600 = minimum_rtu_delay(&br_9600);

        assert_eq!(
            check_rtu_delay(Duration::from_millis(3), &br_9600),
            min_delay_9600
        );
        assert_eq!(
            check_rtu_delay(Duration::from_millis(5), &br_9600),
            Duration::from_millis(5)
        );
        assert_eq!(check_rtu_delay(min_delay_9600, &br_9600), min_delay_9600);
    }

    #[test]
    fn test_resolve_register() {
        assert_eq!(resolve_register(0, false).unwrap(), 0);
        assert_eq!(resolve_register(0, true).unwrap(), 0);
        assert_eq!(resolve_register(2000, false).unwrap(), 2000);
        assert_eq!(resolve_register(40016, true).unwrap(), 16);
        assert!(resolve_register(70000, false).is_err());
        assert!(resolve_register(2000, true).is_err());
        assert_eq!(resolve_register(40000, true).unwrap(), 0);
    }

    #[test]
    fn test_resolve_batch_register() {
        assert_eq!(resolve_batch_register(0, true).unwrap(), 0);
        assert_eq!(resolve_batch_register(0, false).unwrap(), 0);
        assert_eq!(resolve_batch_register(40016, true).unwrap(), 16);
        assert!(resolve_batch_register(40000, true).is_err());
    }

    #[test]
    fn test_format_scaled() {
        let tenth = proto::ScaleFactor::default();
        let one = proto::ScaleFactor::try_from(1.0f64).unwrap();
        assert_eq!(
            format_scaled(123.45f32 as f64 * 0.1, ValueFormat::Float, &tenth),
            "12.345"
        );
        assert_eq!(format_scaled(20.0, ValueFormat::Float, &tenth), "20");
        assert_eq!(format_scaled(1.5, ValueFormat::Unsigned, &tenth), "1.5");
        assert_eq!(format_scaled(42.0, ValueFormat::Signed, &one), "42");
        assert_eq!(format_scaled(-7.0, ValueFormat::Signed, &one), "-7");
        assert_eq!(format_scaled(0.25, ValueFormat::Float, &one), "0.25");
        assert_eq!(format_scaled(-0.000001, ValueFormat::Float, &tenth), "0");
        assert_eq!(format_scaled(-0.0, ValueFormat::Float, &one), "0");
        assert_eq!(format_scaled(-0.5, ValueFormat::Float, &one), "-0.5");
    }
}
