//! Blocking transaction orchestrator.
//!
//! [`ForceMeter`] owns its [`Transport`] and runs one request/response cycle at
//! a time: it writes the request frame, blocks until the expected number of
//! bytes or the timeout, and validates what arrived. It never retries; every
//! failure is returned to the caller as a distinct [`crate::Error`] variant.
//!
//! ## Example
//!
//! ```no_run
//! use forcemeter_lib::{
//!     protocol::{BatchReadSpec, ScaleFactor, SlaveAddress, ValueFormat},
//!     sync_client::ForceMeter,
//!     transport::{SerialSettings, SerialTransport},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = SerialTransport::open("/dev/ttyUSB0", &SerialSettings::default())?;
//!     let mut meter = ForceMeter::new(transport);
//!
//!     let spec = BatchReadSpec::new(
//!         SlaveAddress::default(),
//!         vec![2000, 2002, 2004, 2006, 0, 0, 0, 0],
//!         ScaleFactor::default(),
//!         ValueFormat::Float,
//!     )?;
//!     for (address, outcome) in meter.read_batch(&spec)? {
//!         match outcome {
//!             Ok(reading) => println!("{address}: {}", reading.scaled),
//!             Err(error) => println!("{address}: {error}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::{
    frame::{HexBytes, ReadRequest, WriteRequest},
    protocol::{
        BatchOutcome, BatchReadSpec, Reading, RegisterAddress, ScaleFactor, SlaveAddress,
        Value32, ValueFormat,
    },
    transport::Transport,
    Result,
};
use log::*;
use std::time::Duration;

/// Read timeout used until [`ForceMeter::set_timeout`] is called.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Read size used while discarding a late response.
pub(crate) const DISCARD_CHUNK: usize = 64;

/// Files the result of one batch address into `outcome`.
///
/// Returns the error instead if it is a link failure, which ends the batch.
pub(crate) fn record_batch_result(
    outcome: &mut BatchOutcome,
    address: RegisterAddress,
    result: Result<Reading>,
) -> Result<()> {
    match result {
        Err(error) if error.is_link_failure() => {
            error!("Batch read aborted at address {address}: {error}");
            return Err(error);
        }
        Err(ref error) => warn!("Address {address}: {error}"),
        Ok(ref reading) => {
            trace!("Address {address}: {} -> {}", reading.value, reading.scaled)
        }
    }
    outcome.push((address, result));
    Ok(())
}

/// Synchronous client for force meters and transmitters on a Modbus RTU bus.
#[derive(Debug)]
pub struct ForceMeter<T> {
    transport: T,
    timeout: Duration,
    delay: Duration,
    /// Set when the last response was incomplete; its remainder may still arrive.
    stale: bool,
}

impl<T: Transport> ForceMeter<T> {
    /// Creates a client that exclusively owns `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
            delay: Duration::ZERO,
            stale: false,
        }
    }

    /// Sets how long to wait for a complete response.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the silent interval between consecutive frames of a batch.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Releases the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Reads and drops input until the line stays quiet for one timeout.
    fn discard_stale_input(&mut self) -> Result<()> {
        loop {
            let stale = self.transport.read(DISCARD_CHUNK, self.timeout)?;
            if stale.is_empty() {
                break;
            }
            debug!("Discarded late bytes: {}", HexBytes(&stale));
        }
        self.stale = false;
        Ok(())
    }

    /// Writes `frame` and reads at most `expected_len` bytes back.
    fn transact(&mut self, frame: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if self.stale {
            self.discard_stale_input()?;
        }
        debug!("TX: {}", HexBytes(frame));
        self.transport.write(frame)?;
        let response = self.transport.read(expected_len, self.timeout)?;
        self.stale = response.len() < expected_len;
        if response.is_empty() {
            debug!("RX: nothing within {:?}", self.timeout);
        } else {
            debug!("RX: {}", HexBytes(&response));
        }
        Ok(response)
    }

    /// Runs a read request and returns the validated payload bytes.
    pub fn read_payload(&mut self, request: &ReadRequest) -> Result<Vec<u8>> {
        let response = self.transact(&request.encode(), request.expected_response_len())?;
        request.parse_response(&response).map(<[u8]>::to_vec)
    }

    /// Reads the 32-bit value stored at `address` and `address + 1`.
    pub fn read_value(
        &mut self,
        slave: SlaveAddress,
        address: RegisterAddress,
        format: ValueFormat,
    ) -> Result<Value32> {
        let mut values = self.read_values(slave, address, 1, format)?;
        Ok(values.remove(0))
    }

    /// Reads `count` consecutive 32-bit values with a single request frame.
    pub fn read_values(
        &mut self,
        slave: SlaveAddress,
        start: RegisterAddress,
        count: u16,
        format: ValueFormat,
    ) -> Result<Vec<Value32>> {
        let request = ReadRequest::block(slave, start, count)?;
        let response = self.transact(&request.encode(), request.expected_response_len())?;
        request.decode_response(&response, format)
    }

    /// Reads one value and applies `scale`.
    pub fn read_scaled(
        &mut self,
        slave: SlaveAddress,
        address: RegisterAddress,
        format: ValueFormat,
        scale: ScaleFactor,
    ) -> Result<Reading> {
        let request = ReadRequest::single(slave, address)?;
        let payload = self.read_payload(&request)?;
        Reading::decode(address, &payload, format, scale)
    }

    /// Writes one 32-bit value to `address` and `address + 1`.
    ///
    /// The value is sent as given; no scale factor applies to writes.
    pub fn write_value(
        &mut self,
        slave: SlaveAddress,
        address: RegisterAddress,
        value: Value32,
    ) -> Result<()> {
        let request = WriteRequest::new(slave, address, value)?;
        let response = self.transact(&request.encode(), request.expected_response_len())?;
        request.parse_response(&response)
    }

    /// Reads every non-sentinel address of `spec`, one transaction each.
    ///
    /// A failing address is recorded and the batch continues. Only a link
    /// failure aborts the whole batch.
    pub fn read_batch(&mut self, spec: &BatchReadSpec) -> Result<BatchOutcome> {
        let mut outcome = Vec::with_capacity(spec.addresses().len());
        for (index, address) in spec.active_addresses().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let result = self.read_scaled(spec.slave(), address, spec.format(), spec.scale());
            record_batch_result(&mut outcome, address, result)?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crc,
        frame::tests::{read_response, slave, write_response},
        transport::tests::ScriptedTransport,
        Error,
    };
    use assert_matches::assert_matches;

    fn meter(responses: impl IntoIterator<Item = Vec<u8>>) -> ForceMeter<ScriptedTransport> {
        ForceMeter::new(ScriptedTransport::with_responses(responses))
    }

    fn float_spec(addresses: Vec<u16>) -> BatchReadSpec {
        BatchReadSpec::new(
            slave(1),
            addresses,
            ScaleFactor::default(),
            ValueFormat::Float,
        )
        .unwrap()
    }

    #[test]
    fn read_scaled_float() {
        let mut meter = meter([read_response(1, &[0x42, 0xF6, 0xE6, 0x66])]);
        let reading = meter
            .read_scaled(slave(1), 0x0010, ValueFormat::Float, ScaleFactor::default())
            .unwrap();
        assert_eq!(reading.value, Value32::Float(123.45));
        assert!((reading.scaled - 12.345).abs() < 1e-4);
        assert_eq!(
            meter.into_inner().written,
            vec![ReadRequest::single(slave(1), 0x0010).unwrap().encode()]
        );
    }

    #[test]
    fn read_value_timeout() {
        let mut meter = meter([]);
        assert_matches!(
            meter.read_value(slave(1), 16, ValueFormat::Signed),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn read_block_of_values() {
        let payload = [
            0x43, 0xFA, 0x00, 0x00, // 500.0
            0x42, 0xF6, 0xE6, 0x66, // 123.45
            0xC0, 0x00, 0x00, 0x00, // -2.0
        ];
        let mut meter = meter([read_response(1, &payload)]);
        let values = meter
            .read_values(slave(1), 16, 3, ValueFormat::Float)
            .unwrap();
        assert_eq!(
            values,
            vec![
                Value32::Float(500.0),
                Value32::Float(123.45),
                Value32::Float(-2.0)
            ]
        );
        let written = &meter.into_inner().written[0];
        assert_eq!(&written[4..6], &[0x00, 0x06]);
    }

    #[test]
    fn batch_skips_sentinels_and_keeps_order() {
        let mut meter = meter([
            read_response(1, &[0x00, 0x00, 0x00, 0x0A]),
            read_response(1, &[0x00, 0x00, 0x00, 0x14]),
        ]);
        let spec = BatchReadSpec::new(
            slave(1),
            vec![2000, 0, 2004, 0, 0, 0, 0, 0],
            ScaleFactor::try_from(1.0f64).unwrap(),
            ValueFormat::Unsigned,
        )
        .unwrap();
        let outcome = meter.read_batch(&spec).unwrap();
        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome[0].0, 2000);
        assert_eq!(outcome[1].0, 2004);
        assert_matches!(&outcome[0].1, Ok(reading) if reading.scaled == 10.0);
        assert_matches!(&outcome[1].1, Ok(reading) if reading.scaled == 20.0);

        let written = meter.into_inner().written;
        assert_eq!(written.len(), 2);
        assert_eq!(&written[0][2..4], &2000u16.to_be_bytes());
        assert_eq!(&written[1][2..4], &2004u16.to_be_bytes());
    }

    #[test]
    fn batch_continues_after_per_address_failures() {
        let mut corrupted = read_response(1, &[0x42, 0xF6, 0xE6, 0x66]);
        corrupted[3] ^= 0xFF;
        let mut meter = meter([
            Vec::new(),
            Vec::new(),
            corrupted,
            read_response(9, &[0, 0, 0, 1]),
            read_response(1, &[0x42, 0xF6, 0xE6, 0x66]),
        ]);
        let outcome = meter
            .read_batch(&float_spec(vec![2000, 2002, 2004, 2006]))
            .unwrap();
        assert_eq!(outcome.len(), 4);
        assert_matches!(outcome[0].1, Err(Error::Timeout));
        assert_matches!(outcome[1].1, Err(Error::CrcMismatch { .. }));
        assert_matches!(outcome[2].1, Err(Error::SlaveMismatch { .. }));
        assert_matches!(&outcome[3].1, Ok(reading) if (reading.scaled - 12.345).abs() < 1e-4);
    }

    #[test]
    fn batch_records_decode_errors() {
        let mut short_payload = vec![0x01, 0x03, 0x02, 0x00, 0x01];
        crc::append_crc(&mut short_payload);
        let mut meter = meter([
            short_payload,
            Vec::new(),
            read_response(1, &[0x3F, 0x80, 0x00, 0x00]),
        ]);
        let outcome = meter.read_batch(&float_spec(vec![100, 102])).unwrap();
        assert_matches!(outcome[0].1, Err(Error::Decode { len: 2, .. }));
        assert_matches!(&outcome[1].1, Ok(reading) if reading.value == Value32::Float(1.0));
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_address() {
        let mut meter = meter([
            Vec::new(),
            read_response(1, &[0x00, 0x00, 0x03, 0xE7]),
            Vec::new(),
            Vec::new(),
        ]);
        let spec = BatchReadSpec::new(
            slave(1),
            vec![2000, 2004],
            ScaleFactor::try_from(1.0f64).unwrap(),
            ValueFormat::Signed,
        )
        .unwrap();
        let outcome = meter.read_batch(&spec).unwrap();
        assert_matches!(outcome[0], (2000, Err(Error::Timeout)));
        assert_matches!(outcome[1], (2004, Err(Error::Timeout)));
        let transport = meter.into_inner();
        assert_eq!(transport.written.len(), 2);
        assert!(transport.responses.is_empty());
    }

    #[test]
    fn complete_response_skips_discarding() {
        let mut meter = meter([
            read_response(1, &[0x00, 0x00, 0x00, 0x01]),
            read_response(1, &[0x00, 0x00, 0x00, 0x02]),
        ]);
        assert_eq!(
            meter.read_value(slave(1), 16, ValueFormat::Signed).unwrap(),
            Value32::Signed(1)
        );
        assert_eq!(
            meter.read_value(slave(1), 20, ValueFormat::Signed).unwrap(),
            Value32::Signed(2)
        );
    }

    #[test]
    fn batch_aborts_on_link_failure() {
        let mut transport = ScriptedTransport::with_responses([]);
        transport.fail_writes = true;
        let mut meter = ForceMeter::new(transport);
        assert_matches!(
            meter.read_batch(&float_spec(vec![2000, 2002])),
            Err(Error::Transport(..))
        );
    }

    #[test]
    fn batch_aborts_on_read_failure() {
        let mut transport = ScriptedTransport::with_responses([]);
        transport.responses.push_back(Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "adapter unplugged",
        )));
        let mut meter = ForceMeter::new(transport);
        assert_matches!(
            meter.read_batch(&float_spec(vec![2000, 2002])),
            Err(Error::Transport(..))
        );
        assert_eq!(meter.into_inner().written.len(), 1);
    }

    #[test]
    fn empty_batch_sends_nothing() {
        let mut meter = meter([]);
        let outcome = meter.read_batch(&float_spec(vec![0; 8])).unwrap();
        assert!(outcome.is_empty());
        assert!(meter.into_inner().written.is_empty());
    }

    #[test]
    fn write_value_success() {
        let mut meter = meter([write_response(1, 0x0014, 2)]);
        assert_matches!(
            meter.write_value(slave(1), 0x0014, Value32::Float(500.0)),
            Ok(())
        );
        let written = &meter.into_inner().written[0];
        assert_eq!(&written[7..11], &[0x43, 0xFA, 0x00, 0x00]);
    }

    #[test]
    fn write_value_count_mismatch_is_not_success() {
        let mut meter = meter([write_response(1, 0x0014, 4)]);
        assert_matches!(
            meter.write_value(slave(1), 0x0014, Value32::Signed(7)),
            Err(Error::CountMismatch {
                expected: 2,
                received: 4
            })
        );
    }

    #[test]
    fn write_value_timeout() {
        let mut meter = meter([]);
        assert_matches!(
            meter.write_value(slave(1), 0x0014, Value32::Unsigned(7)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn timeout_and_delay_settings() {
        let mut meter = meter([]);
        assert_eq!(meter.timeout(), DEFAULT_TIMEOUT);
        meter.set_timeout(Duration::from_millis(100));
        meter.set_delay(Duration::from_millis(5));
        assert_eq!(meter.timeout(), Duration::from_millis(100));
        assert_eq!(meter.delay(), Duration::from_millis(5));
    }
}
