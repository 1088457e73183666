//! Domain types and constants of the force meter Modbus RTU protocol.
//!
//! Every measured or configured quantity of the D505-CH4 and DY500 instruments
//! is a 32-bit value spread across two consecutive holding registers, high
//! word first. This module provides strongly typed wrappers for the values the
//! engine accepts from its callers, validating ranges on construction.

use crate::{Error, Result};
use std::{fmt, ops::Deref, str::FromStr};

/// Function code of "Read Holding Registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Function code of "Write Multiple Registers".
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Registers occupied by one 32-bit value.
pub const REGISTERS_PER_VALUE: u16 = 2;
/// Bytes occupied by one 32-bit value.
pub const BYTES_PER_VALUE: usize = 4;
/// Largest number of values one read frame can carry.
///
/// The byte count field of a response is a single byte, so at most 63
/// four-byte values fit.
pub const MAX_VALUES_PER_REQUEST: u16 = 63;

/// Number of address slots of a batch read.
pub const MAX_BATCH_ADDRESSES: usize = 8;
/// Register address that marks an unused batch slot.
pub const SENTINEL_ADDRESS: u16 = 0;

/// Offset of PLC style holding register numbers (4xxxx).
pub const PLC_HOLDING_REGISTER_OFFSET: u32 = 40000;

/// Start address of a 16-bit holding register.
pub type RegisterAddress = u16;

/// Checks that `values` 32-bit values starting at `start` fit below address 65535.
pub fn check_register_block(start: RegisterAddress, values: u16) -> Result<()> {
    if values == 0 || values > MAX_VALUES_PER_REQUEST {
        return Err(Error::InvalidCount(values));
    }
    let registers = values as u32 * REGISTERS_PER_VALUE as u32;
    if start as u32 + registers - 1 > u16::MAX as u32 {
        Err(Error::RegisterOverflow { start, registers })
    } else {
        Ok(())
    }
}

/// Converts a PLC style holding register number (e.g. `40016`) into a register address (`16`).
pub fn register_from_plc_notation(number: u32) -> Result<RegisterAddress> {
    number
        .checked_sub(PLC_HOLDING_REGISTER_OFFSET)
        .and_then(|address| u16::try_from(address).ok())
        .ok_or(Error::InvalidPlcRegister(number))
}

/// Modbus slave address of an instrument on the RS-485 bus.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveAddress(u8);

impl SlaveAddress {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;
}

impl Default for SlaveAddress {
    fn default() -> Self {
        Self(0x01)
    }
}

impl Deref for SlaveAddress {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for SlaveAddress {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(value as u16))
        }
    }
}

impl From<SlaveAddress> for u8 {
    fn from(address: SlaveAddress) -> u8 {
        address.0
    }
}

impl fmt::Display for SlaveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial baud rates offered by the instruments.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        match baud_rate {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = String;
    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            9600 => Ok(BaudRate::B9600),
            19200 => Ok(BaudRate::B19200),
            38400 => Ok(BaudRate::B38400),
            57600 => Ok(BaudRate::B57600),
            115200 => Ok(BaudRate::B115200),
            _ => Err(format!(
                "Unsupported baud rate {value}, expected one of 9600, 19200, 38400, 57600, 115200"
            )),
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// How the four payload bytes of a value are interpreted.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    /// IEEE-754 single precision, big-endian.
    #[default]
    Float,
    /// Two's complement 32-bit integer, big-endian.
    Signed,
    /// Bytes assembled as `(b0 << 24) | (b1 << 16) | (b2 << 8) | b3`.
    Unsigned,
}

impl FromStr for ValueFormat {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "f32" => Ok(ValueFormat::Float),
            "signed" | "long" | "i32" => Ok(ValueFormat::Signed),
            "unsigned" | "u32" => Ok(ValueFormat::Unsigned),
            _ => Err(format!(
                "Unknown value format '{s}', expected float, signed or unsigned"
            )),
        }
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueFormat::Float => "float",
            ValueFormat::Signed => "signed",
            ValueFormat::Unsigned => "unsigned",
        })
    }
}

/// A decoded 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value32 {
    Float(f32),
    Signed(i32),
    Unsigned(u32),
}

impl Value32 {
    /// Parses a user supplied value in the given format.
    pub fn parse(s: &str, format: ValueFormat) -> std::result::Result<Self, String> {
        let s = s.trim();
        match format {
            ValueFormat::Float => s
                .parse::<f32>()
                .map(Value32::Float)
                .map_err(|e| format!("Invalid float value '{s}': {e}")),
            ValueFormat::Signed => s
                .parse::<i32>()
                .map(Value32::Signed)
                .map_err(|e| format!("Invalid signed value '{s}': {e}")),
            ValueFormat::Unsigned => s
                .parse::<u32>()
                .map(Value32::Unsigned)
                .map_err(|e| format!("Invalid unsigned value '{s}': {e}")),
        }
    }

    pub fn format(&self) -> ValueFormat {
        match self {
            Value32::Float(_) => ValueFormat::Float,
            Value32::Signed(_) => ValueFormat::Signed,
            Value32::Unsigned(_) => ValueFormat::Unsigned,
        }
    }

    /// The numeric value, widened for scaling.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value32::Float(value) => value as f64,
            Value32::Signed(value) => value as f64,
            Value32::Unsigned(value) => value as f64,
        }
    }
}

impl fmt::Display for Value32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value32::Float(value) => write!(f, "{value}"),
            Value32::Signed(value) => write!(f, "{value}"),
            Value32::Unsigned(value) => write!(f, "{value}"),
        }
    }
}

/// Multiplier converting a raw reading into the display unit.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "f64", into = "f64"))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub const DEFAULT: f64 = 0.1;

    pub fn apply(&self, value: Value32) -> f64 {
        value.as_f64() * self.0
    }

    /// Returns `true` if readings pass through unchanged.
    pub fn is_identity(&self) -> bool {
        self.0 == 1.0
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl Deref for ScaleFactor {
    type Target = f64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for ScaleFactor {
    type Error = Error;
    fn try_from(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(Error::InvalidScale(value))
        }
    }
}

impl From<ScaleFactor> for f64 {
    fn from(scale: ScaleFactor) -> f64 {
        scale.0
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A successfully read and scaled value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub address: RegisterAddress,
    /// Payload bytes as received, high byte first.
    pub raw: [u8; BYTES_PER_VALUE],
    pub value: Value32,
    /// `value` multiplied by the scale factor of the request.
    pub scaled: f64,
}

impl Reading {
    /// Decodes the payload of a single value read and applies `scale`.
    pub fn decode(
        address: RegisterAddress,
        payload: &[u8],
        format: ValueFormat,
        scale: ScaleFactor,
    ) -> Result<Self> {
        let value = crate::codec::decode_bytes(payload, format)?;
        let mut raw = [0u8; BYTES_PER_VALUE];
        raw.copy_from_slice(payload);
        Ok(Self {
            address,
            raw,
            value,
            scaled: scale.apply(value),
        })
    }
}

/// Per-address outcomes of a batch read, in slot order, sentinels omitted.
pub type BatchOutcome = Vec<(RegisterAddress, Result<Reading>)>;

/// Parameters of a multi-address batch read.
///
/// Slots holding [`SENTINEL_ADDRESS`] are kept, so the slot layout of the
/// caller survives, but they are skipped when the batch runs.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReadSpec {
    slave: SlaveAddress,
    addresses: Vec<RegisterAddress>,
    scale: ScaleFactor,
    format: ValueFormat,
}

impl BatchReadSpec {
    pub fn new(
        slave: SlaveAddress,
        addresses: Vec<RegisterAddress>,
        scale: ScaleFactor,
        format: ValueFormat,
    ) -> Result<Self> {
        if addresses.len() > MAX_BATCH_ADDRESSES {
            return Err(Error::TooManyAddresses(addresses.len()));
        }
        for &address in addresses.iter().filter(|a| **a != SENTINEL_ADDRESS) {
            check_register_block(address, 1)?;
        }
        Ok(Self {
            slave,
            addresses,
            scale,
            format,
        })
    }

    pub fn slave(&self) -> SlaveAddress {
        self.slave
    }

    pub fn scale(&self) -> ScaleFactor {
        self.scale
    }

    pub fn format(&self) -> ValueFormat {
        self.format
    }

    /// All slots, sentinels included.
    pub fn addresses(&self) -> &[RegisterAddress] {
        &self.addresses
    }

    /// The addresses that will actually be read, in slot order.
    pub fn active_addresses(&self) -> impl Iterator<Item = RegisterAddress> + '_ {
        self.addresses
            .iter()
            .copied()
            .filter(|address| *address != SENTINEL_ADDRESS)
    }
}
