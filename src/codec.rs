//! Conversion between 32-bit values and pairs of big-endian holding registers.
//!
//! The high word always lives at the lower register address.

use crate::{
    protocol::{Value32, ValueFormat, BYTES_PER_VALUE},
    Error, Result,
};

/// Encodes a value into two register words, high word first.
pub fn encode(value: Value32) -> [u16; 2] {
    let word = u32::from_be_bytes(to_bytes(value));
    [(word >> 16) as u16, word as u16]
}

/// Encodes a value into its four big-endian wire bytes.
pub fn to_bytes(value: Value32) -> [u8; BYTES_PER_VALUE] {
    match value {
        Value32::Float(value) => value.to_be_bytes(),
        Value32::Signed(value) => value.to_be_bytes(),
        Value32::Unsigned(value) => value.to_be_bytes(),
    }
}

/// Decodes a register pair.
pub fn decode(high: u16, low: u16, format: ValueFormat) -> Value32 {
    let word = (high as u32) << 16 | low as u32;
    from_word(word, format)
}

/// Decodes exactly four big-endian payload bytes.
pub fn decode_bytes(bytes: &[u8], format: ValueFormat) -> Result<Value32> {
    let bytes: [u8; BYTES_PER_VALUE] = bytes.try_into().map_err(|_| Error::Decode {
        len: bytes.len(),
        expected: BYTES_PER_VALUE,
    })?;
    Ok(match format {
        ValueFormat::Float => Value32::Float(f32::from_be_bytes(bytes)),
        ValueFormat::Signed => Value32::Signed(i32::from_be_bytes(bytes)),
        ValueFormat::Unsigned => Value32::Unsigned(
            (bytes[0] as u32) << 24
                | (bytes[1] as u32) << 16
                | (bytes[2] as u32) << 8
                | bytes[3] as u32,
        ),
    })
}

/// Decodes a payload holding `values` consecutive 32-bit values.
pub fn decode_many(payload: &[u8], values: usize, format: ValueFormat) -> Result<Vec<Value32>> {
    let expected = values * BYTES_PER_VALUE;
    if payload.len() != expected {
        return Err(Error::Decode {
            len: payload.len(),
            expected,
        });
    }
    payload
        .chunks_exact(BYTES_PER_VALUE)
        .map(|chunk| decode_bytes(chunk, format))
        .collect()
}

fn from_word(word: u32, format: ValueFormat) -> Value32 {
    match format {
        ValueFormat::Float => Value32::Float(f32::from_bits(word)),
        ValueFormat::Signed => Value32::Signed(word as i32),
        ValueFormat::Unsigned => Value32::Unsigned(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn float_register_layout() {
        assert_eq!(encode(Value32::Float(123.45)), [0x42F6, 0xE666]);
        assert_eq!(encode(Value32::Float(500.0)), [0x43FA, 0x0000]);
        assert_eq!(
            decode(0x42F6, 0xE666, ValueFormat::Float),
            Value32::Float(123.45)
        );
    }

    #[test]
    fn float_round_trip_is_bit_exact() {
        for value in [
            0.0f32,
            -0.0,
            1.0,
            -1.5,
            f32::MIN_POSITIVE,
            f32::MAX,
            f32::MIN,
            f32::INFINITY,
            1.0e-40,
        ] {
            let [high, low] = encode(Value32::Float(value));
            let Value32::Float(decoded) = decode(high, low, ValueFormat::Float) else {
                panic!("expected a float");
            };
            assert_eq!(decoded.to_bits(), value.to_bits());
        }
        let nan = f32::from_bits(0x7FC0_1234);
        let bytes = to_bytes(Value32::Float(nan));
        let Ok(Value32::Float(decoded)) = decode_bytes(&bytes, ValueFormat::Float) else {
            panic!("expected a float");
        };
        assert_eq!(decoded.to_bits(), nan.to_bits());
    }

    #[test]
    fn integer_round_trip() {
        for value in [0i32, 1, -1, i32::MIN, i32::MAX, 0x1234_5678] {
            let [high, low] = encode(Value32::Signed(value));
            assert_eq!(
                decode(high, low, ValueFormat::Signed),
                Value32::Signed(value)
            );
            assert_matches!(
                decode_bytes(&to_bytes(Value32::Signed(value)), ValueFormat::Signed),
                Ok(Value32::Signed(v)) if v == value
            );
        }
        for value in [0u32, 1, u32::MAX, 0x8000_0000] {
            let [high, low] = encode(Value32::Unsigned(value));
            assert_eq!(
                decode(high, low, ValueFormat::Unsigned),
                Value32::Unsigned(value)
            );
            assert_matches!(
                decode_bytes(&to_bytes(Value32::Unsigned(value)), ValueFormat::Unsigned),
                Ok(Value32::Unsigned(v)) if v == value
            );
        }
    }

    #[test]
    fn signed_and_unsigned_modes_differ() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFE];
        assert_matches!(
            decode_bytes(&bytes, ValueFormat::Signed),
            Ok(Value32::Signed(-2))
        );
        assert_matches!(
            decode_bytes(&bytes, ValueFormat::Unsigned),
            Ok(Value32::Unsigned(0xFFFF_FFFE))
        );
    }

    #[test]
    fn decode_requires_four_bytes() {
        assert_matches!(
            decode_bytes(&[0x00, 0x01, 0x02], ValueFormat::Float),
            Err(Error::Decode {
                len: 3,
                expected: 4
            })
        );
        assert_matches!(
            decode_bytes(&[0; 5], ValueFormat::Signed),
            Err(Error::Decode { len: 5, .. })
        );
    }

    #[test]
    fn decode_many_values() {
        let payload = [0x43, 0xFA, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07];
        let values = decode_many(&payload, 2, ValueFormat::Float).unwrap();
        assert_eq!(values[0], Value32::Float(500.0));
        assert_matches!(
            decode_many(&payload, 3, ValueFormat::Float),
            Err(Error::Decode {
                len: 8,
                expected: 12
            })
        );
    }
}
