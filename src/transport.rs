//! Byte oriented links the orchestrator talks through.
//!
//! The transaction engine never touches a serial port directly; it owns some
//! [`Transport`] and performs exactly one write followed by one bounded read
//! per transaction.

use crate::protocol::BaudRate;
use std::time::Duration;

/// A half-duplex byte link to the instruments.
pub trait Transport {
    /// Sends a complete request frame.
    fn write(&mut self, frame: &[u8]) -> std::io::Result<()>;

    /// Reads until `max_bytes` arrived or `timeout` expired.
    ///
    /// Returns whatever arrived, possibly nothing. A timeout is not an error
    /// at this layer.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> std::io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, frame: &[u8]) -> std::io::Result<()> {
        (**self).write(frame)
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> std::io::Result<Vec<u8>> {
        (**self).read(max_bytes, timeout)
    }
}

/// Parity of the serial line.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl std::str::FromStr for Parity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            _ => Err(format!("Unknown parity '{s}', expected none, odd or even")),
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
        })
    }
}

/// Line settings of an RS-485 adapter.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: BaudRate,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::default(),
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl std::fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

#[cfg(feature = "serial")]
pub use self::serial::*;

#[cfg(feature = "serial")]
mod serial {
    use super::{Parity, SerialSettings, Transport};
    use crate::frame::HexBytes;
    use std::{
        io::{ErrorKind, Read, Write},
        time::{Duration, Instant},
    };
    use tokio_serial::{ClearBuffer, SerialPort};

    /// Creates a `tokio_serial::SerialPortBuilder` for the given device and line settings.
    ///
    /// # Arguments
    ///
    /// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
    /// * `settings` - Baud rate, data bits, parity and stop bits.
    pub fn serial_port_builder(
        device: &str,
        settings: &SerialSettings,
    ) -> std::io::Result<tokio_serial::SerialPortBuilder> {
        let data_bits = match settings.data_bits {
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("Unsupported number of data bits: {other}"),
                ))
            }
        };
        let stop_bits = match settings.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("Unsupported number of stop bits: {other}"),
                ))
            }
        };
        let parity = match settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        Ok(tokio_serial::new(device, u32::from(settings.baud_rate))
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .flow_control(tokio_serial::FlowControl::None))
    }

    /// Blocking serial port transport.
    ///
    /// The port is closed when the transport is dropped.
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Opens `device` with the given line settings.
        pub fn open(device: &str, settings: &SerialSettings) -> std::io::Result<Self> {
            let port = serial_port_builder(device, settings)?.open()?;
            log::info!("Opened serial port {device} ({settings})");
            Ok(Self { port })
        }
    }

    impl std::fmt::Debug for SerialTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SerialTransport")
                .field("name", &self.port.name())
                .finish()
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, frame: &[u8]) -> std::io::Result<()> {
            // Stale bytes of an earlier, timed out response would corrupt this transaction.
            self.port.clear(ClearBuffer::Input)?;
            self.port.write_all(frame)?;
            self.port.flush()
        }

        fn read(&mut self, max_bytes: usize, timeout: Duration) -> std::io::Result<Vec<u8>> {
            let deadline = Instant::now() + timeout;
            let mut buffer = vec![0u8; max_bytes];
            let mut filled = 0;
            while filled < max_bytes {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.port.set_timeout(remaining)?;
                match self.port.read(&mut buffer[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(err) if err.kind() == ErrorKind::TimedOut => break,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            }
            buffer.truncate(filled);
            log::trace!("Serial read {filled}/{max_bytes} bytes: {}", HexBytes(&buffer));
            Ok(buffer)
        }
    }
}
