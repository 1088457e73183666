//! Modbus RTU CRC16.
//!
//! Reflected polynomial `0xA001`, initial value `0xFFFF`. The checksum is
//! transmitted low byte first, which is the only little-endian field of an
//! RTU frame.

use crate::{Error, Result};

const POLYNOMIAL: u16 = 0xA001;
const INITIAL: u16 = 0xFFFF;

/// Computes the Modbus CRC16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INITIAL;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the CRC of `frame` to itself, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Verifies the trailing two CRC bytes of a complete frame.
///
/// The caller guarantees `frame.len() >= 2`.
pub fn check_crc(frame: &[u8]) -> Result<()> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let calculated = crc16(body);
    if received == calculated {
        Ok(())
    } else {
        Err(Error::CrcMismatch {
            received,
            calculated,
        })
    }
}
