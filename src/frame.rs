//! RTU request frames and the validation of their responses.
//!
//! A request knows how to encode itself and how to judge the bytes that came
//! back. Validation runs strictly in this order and stops at the first failure:
//!
//! 1. nothing received: [`Error::Timeout`]
//! 2. below the minimum length: [`Error::ShortResponse`]
//! 3. CRC: [`Error::CrcMismatch`]
//! 4. slave address: [`Error::SlaveMismatch`]
//! 5. function code: [`Error::FunctionCodeMismatch`]
//! 6. writes only, echoed address and count: [`Error::AddressMismatch`], [`Error::CountMismatch`]

use crate::{
    codec, crc,
    protocol::{
        self as proto, RegisterAddress, SlaveAddress, Value32, ValueFormat, BYTES_PER_VALUE,
        REGISTERS_PER_VALUE,
    },
    Error, Result,
};
use std::fmt;

/// Smallest read response accepted: slave, function, byte count and CRC.
pub const MIN_READ_RESPONSE_LEN: usize = 5;
/// Smallest write response accepted before the CRC check.
pub const MIN_WRITE_RESPONSE_LEN: usize = 6;
/// Full length of a write echo.
pub const WRITE_RESPONSE_LEN: usize = 8;

/// Read Holding Registers request for one or more consecutive 32-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    slave: SlaveAddress,
    start: RegisterAddress,
    values: u16,
}

impl ReadRequest {
    /// A request for the single 32-bit value at `start`.
    pub fn single(slave: SlaveAddress, start: RegisterAddress) -> Result<Self> {
        Self::block(slave, start, 1)
    }

    /// A request for `values` consecutive 32-bit values starting at `start`.
    pub fn block(slave: SlaveAddress, start: RegisterAddress, values: u16) -> Result<Self> {
        proto::check_register_block(start, values)?;
        Ok(Self {
            slave,
            start,
            values,
        })
    }

    pub fn slave(&self) -> SlaveAddress {
        self.slave
    }

    pub fn start(&self) -> RegisterAddress {
        self.start
    }

    pub fn values(&self) -> u16 {
        self.values
    }

    pub fn register_count(&self) -> u16 {
        self.values * REGISTERS_PER_VALUE
    }

    /// `[slave][0x03][addr hi][addr lo][count hi][count lo][crc lo][crc hi]`
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8);
        frame.push(*self.slave);
        frame.push(proto::READ_HOLDING_REGISTERS);
        frame.extend_from_slice(&self.start.to_be_bytes());
        frame.extend_from_slice(&self.register_count().to_be_bytes());
        crc::append_crc(&mut frame);
        frame
    }

    /// Length of a complete, well-formed response.
    pub fn expected_response_len(&self) -> usize {
        MIN_READ_RESPONSE_LEN + self.values as usize * BYTES_PER_VALUE
    }

    /// Validates a response and returns its payload.
    ///
    /// The payload is bounded by the byte count field and by the CRC; whether
    /// it holds the requested number of values is left to the decoder.
    pub fn parse_response<'a>(&self, response: &'a [u8]) -> Result<&'a [u8]> {
        validate_header(
            response,
            self.slave,
            proto::READ_HOLDING_REGISTERS,
            MIN_READ_RESPONSE_LEN,
        )?;
        let byte_count = response[2] as usize;
        let end = (3 + byte_count).min(response.len() - 2);
        Ok(&response[3..end])
    }

    /// Validates a response and decodes all requested values.
    pub fn decode_response(&self, response: &[u8], format: ValueFormat) -> Result<Vec<Value32>> {
        let payload = self.parse_response(response)?;
        codec::decode_many(payload, self.values as usize, format)
    }
}

/// Write Multiple Registers request carrying exactly one 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRequest {
    slave: SlaveAddress,
    start: RegisterAddress,
    value: Value32,
}

impl WriteRequest {
    pub fn new(slave: SlaveAddress, start: RegisterAddress, value: Value32) -> Result<Self> {
        proto::check_register_block(start, 1)?;
        Ok(Self {
            slave,
            start,
            value,
        })
    }

    pub fn slave(&self) -> SlaveAddress {
        self.slave
    }

    pub fn start(&self) -> RegisterAddress {
        self.start
    }

    pub fn value(&self) -> Value32 {
        self.value
    }

    /// `[slave][0x10][addr hi][addr lo][0x00][0x02][0x04][value x4][crc lo][crc hi]`
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(13);
        frame.push(*self.slave);
        frame.push(proto::WRITE_MULTIPLE_REGISTERS);
        frame.extend_from_slice(&self.start.to_be_bytes());
        frame.extend_from_slice(&REGISTERS_PER_VALUE.to_be_bytes());
        frame.push(BYTES_PER_VALUE as u8);
        frame.extend_from_slice(&codec::to_bytes(self.value));
        crc::append_crc(&mut frame);
        frame
    }

    pub fn expected_response_len(&self) -> usize {
        WRITE_RESPONSE_LEN
    }

    /// Validates the echo of the slave.
    pub fn parse_response(&self, response: &[u8]) -> Result<()> {
        validate_header(
            response,
            self.slave,
            proto::WRITE_MULTIPLE_REGISTERS,
            MIN_WRITE_RESPONSE_LEN,
        )?;
        let address = u16::from_be_bytes([response[2], response[3]]);
        if address != self.start {
            return Err(Error::AddressMismatch {
                expected: self.start,
                received: address,
            });
        }
        let count = u16::from_be_bytes([response[4], response[5]]);
        if count != REGISTERS_PER_VALUE {
            return Err(Error::CountMismatch {
                expected: REGISTERS_PER_VALUE,
                received: count,
            });
        }
        Ok(())
    }
}

/// Checks length, CRC, slave address and function code.
fn validate_header(
    response: &[u8],
    slave: SlaveAddress,
    function: u8,
    min_len: usize,
) -> Result<()> {
    if response.is_empty() {
        return Err(Error::Timeout);
    }
    if response.len() < min_len {
        return Err(Error::ShortResponse {
            len: response.len(),
            min: min_len,
        });
    }
    crc::check_crc(response)?;
    if response[0] != *slave {
        return Err(Error::SlaveMismatch {
            expected: *slave,
            received: response[0],
        });
    }
    if response[1] != function {
        return Err(Error::FunctionCodeMismatch {
            expected: function,
            received: response[1],
        });
    }
    Ok(())
}

/// Displays bytes as spaced upper case hex, e.g. `01 03 07 D0`.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}
