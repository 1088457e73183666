//! Error type shared by every layer of the transaction engine.
//!
//! Each variant is a distinct, named outcome of a transaction. Only
//! [`Error::Transport`] is a link-level failure; everything else is scoped to a
//! single request and never aborts sibling requests of a batch.

/// All possible failures of building, sending and validating a Modbus RTU transaction.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No byte arrived before the read timeout expired.
    #[error("No response received before timeout")]
    Timeout,

    /// The response is shorter than the smallest valid frame.
    #[error("Response too short: {len} bytes, at least {min} expected")]
    ShortResponse { len: usize, min: usize },

    /// The trailing CRC does not match the frame content.
    #[error("CRC mismatch: received {received:#06X}, calculated {calculated:#06X}")]
    CrcMismatch { received: u16, calculated: u16 },

    /// The response was sent by another slave.
    #[error("Slave address mismatch: received {received}, expected {expected}")]
    SlaveMismatch { expected: u8, received: u8 },

    /// The response carries a different function code.
    #[error("Function code mismatch: received {received:#04X}, expected {expected:#04X}")]
    FunctionCodeMismatch { expected: u8, received: u8 },

    /// The write echo names a different start address.
    #[error("Write address mismatch: received {received}, expected {expected}")]
    AddressMismatch { expected: u16, received: u16 },

    /// The write echo names a different register count.
    #[error("Register count mismatch: received {received}, expected {expected}")]
    CountMismatch { expected: u16, received: u16 },

    /// The payload cannot be decoded into 32-bit values.
    #[error("Cannot decode {len} payload bytes, {expected} expected")]
    Decode { len: usize, expected: usize },

    /// The serial link failed while opening, writing or reading.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The Modbus slave address is outside of 1..=247.
    #[error("Slave address {0} out of range (1..=247)")]
    AddressOutOfRange(u16),

    /// The requested registers run past address 65535.
    #[error("Register block starting at {start} with {registers} registers exceeds address 65535")]
    RegisterOverflow { start: u16, registers: u32 },

    /// A PLC style register number outside of 40000..=105535.
    #[error("Holding register number {0} is not in PLC notation (40000..=105535)")]
    InvalidPlcRegister(u32),

    /// The number of values per request is zero or does not fit one frame.
    #[error("Invalid value count {0} (1..={max})", max = crate::protocol::MAX_VALUES_PER_REQUEST)]
    InvalidCount(u16),

    /// The scale factor is not a positive finite number.
    #[error("Invalid scale factor {0}, must be positive and finite")]
    InvalidScale(f64),

    /// A batch holds more address slots than supported.
    #[error("Too many addresses: {0} given, at most {max} allowed", max = crate::protocol::MAX_BATCH_ADDRESSES)]
    TooManyAddresses(usize),
}

impl Error {
    /// Returns `true` if the link itself failed, so no following transaction can succeed.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Error::Transport(..))
    }
}

/// The result type of the transaction engine.
pub type Result<T> = std::result::Result<T, Error>;
