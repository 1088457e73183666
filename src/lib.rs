//! A Modbus RTU transaction engine for D505-CH4 / DY500 force meters and transmitters.
//!
//! The instruments expose every quantity as a 32-bit value (IEEE-754 float or
//! 32-bit integer) spread across two consecutive holding registers. This crate
//! builds the request frames, validates the responses and converts the
//! register contents, using only two function codes:
//!
//! - `0x03` Read Holding Registers
//! - `0x10` Write Multiple Registers
//!
//! ## Layers
//!
//! 1.  **Protocol primitives**: [`crc`], [`codec`], [`protocol`] and [`frame`].
//!     Pure functions and strongly typed requests, usable without any I/O.
//! 2.  **Orchestrators**: [`sync_client::ForceMeter`] (blocking) and
//!     [`tokio_async::ForceMeter`] (`async`). Each exclusively owns its byte
//!     link and runs exactly one transaction at a time, including batch reads
//!     across up to eight addresses.
//!
//! ## Quick Start
//!
//! ```no_run
//! use forcemeter_lib::{
//!     protocol::{SlaveAddress, Value32, ValueFormat},
//!     sync_client::ForceMeter,
//!     transport::{SerialSettings, SerialTransport},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = SerialTransport::open("/dev/ttyUSB0", &SerialSettings::default())?;
//!     let mut meter = ForceMeter::new(transport);
//!     let slave = SlaveAddress::default();
//!
//!     meter.write_value(slave, 0x0014, Value32::Float(500.0))?;
//!     let weight = meter.read_value(slave, 0x0010, ValueFormat::Float)?;
//!     println!("Weight: {weight}");
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod crc;
mod error;
pub mod frame;
pub mod protocol;
pub mod sync_client;
pub mod transport;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-rtu")))]
#[cfg(feature = "tokio-rtu")]
pub mod tokio_async;

pub use error::{Error, Result};
