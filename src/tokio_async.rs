//! Asynchronous transaction orchestrator.
//!
//! Same request/response discipline as [`crate::sync_client`], driven over any
//! `tokio` byte stream. In production that is a `tokio_serial::SerialStream`.
//!
//! ## Example
//!
//! ```no_run
//! use forcemeter_lib::{
//!     protocol::{SlaveAddress, ValueFormat},
//!     tokio_async::ForceMeter,
//!     transport::{serial_port_builder, SerialSettings},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = serial_port_builder("/dev/ttyUSB0", &SerialSettings::default())?;
//!     let port = tokio_serial::SerialStream::open(&builder)?;
//!     let mut meter = ForceMeter::new(port);
//!
//!     let value = meter
//!         .read_value(SlaveAddress::default(), 0x0010, ValueFormat::Float)
//!         .await?;
//!     println!("ALV: {value}");
//!
//!     Ok(())
//! }
//! ```

use crate::{
    frame::{HexBytes, ReadRequest, WriteRequest},
    protocol::{
        BatchOutcome, BatchReadSpec, Reading, RegisterAddress, ScaleFactor, SlaveAddress,
        Value32, ValueFormat,
    },
    sync_client::{record_batch_result, DEFAULT_TIMEOUT, DISCARD_CHUNK},
    Result,
};
use log::*;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Asynchronous client for force meters and transmitters on a Modbus RTU bus.
#[derive(Debug)]
pub struct ForceMeter<S> {
    stream: S,
    timeout: Duration,
    delay: Duration,
    stale: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ForceMeter<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            timeout: DEFAULT_TIMEOUT,
            delay: Duration::ZERO,
            stale: false,
        }
    }

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

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Drops input that is already buffered. After an incomplete response,
    /// keeps dropping until the line stays quiet for one timeout.
    async fn discard_input(&mut self) -> Result<()> {
        let quiet = if self.stale {
            self.timeout
        } else {
            Duration::ZERO
        };
        let mut sink = [0u8; DISCARD_CHUNK];
        loop {
            match tokio::time::timeout(quiet, self.stream.read(&mut sink)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => debug!("Discarded late bytes: {}", HexBytes(&sink[..n])),
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        self.stale = false;
        Ok(())
    }

    async fn transact(&mut self, frame: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        self.discard_input().await?;
        debug!("TX: {}", HexBytes(frame));
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut buffer = vec![0u8; expected_len];
        let mut filled = 0;
        while filled < expected_len {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut buffer[filled..])).await
            {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => break,
            }
        }
        buffer.truncate(filled);
        self.stale = filled < expected_len;
        if buffer.is_empty() {
            debug!("RX: nothing within {:?}", self.timeout);
        } else {
            debug!("RX: {}", HexBytes(&buffer));
        }
        Ok(buffer)
    }

    /// Reads the 32-bit value stored at `address` and `address + 1`.
    pub async fn read_value(
        &mut self,
        slave: SlaveAddress,
        address: RegisterAddress,
        format: ValueFormat,
    ) -> Result<Value32> {
        let mut values = self.read_values(slave, address, 1, format).await?;
        Ok(values.remove(0))
    }

    /// Reads `count` consecutive 32-bit values with a single request frame.
    pub async fn read_values(
        &mut self,
        slave: SlaveAddress,
        start: RegisterAddress,
        count: u16,
        format: ValueFormat,
    ) -> Result<Vec<Value32>> {
        let request = ReadRequest::block(slave, start, count)?;
        let response = self
            .transact(&request.encode(), request.expected_response_len())
            .await?;
        request.decode_response(&response, format)
    }

    /// Reads one value and applies `scale`.
    pub async fn read_scaled(
        &mut self,
        slave: SlaveAddress,
        address: RegisterAddress,
        format: ValueFormat,
        scale: ScaleFactor,
    ) -> Result<Reading> {
        let request = ReadRequest::single(slave, address)?;
        let response = self
            .transact(&request.encode(), request.expected_response_len())
            .await?;
        let payload = request.parse_response(&response)?;
        Reading::decode(address, payload, format, scale)
    }

    /// Writes one 32-bit value; no scale factor applies.
    pub async fn write_value(
        &mut self,
        slave: SlaveAddress,
        address: RegisterAddress,
        value: Value32,
    ) -> Result<()> {
        let request = WriteRequest::new(slave, address, value)?;
        let response = self
            .transact(&request.encode(), request.expected_response_len())
            .await?;
        request.parse_response(&response)
    }

    /// Reads every non-sentinel address of `spec`. See
    /// [`crate::sync_client::ForceMeter::read_batch`].
    pub async fn read_batch(&mut self, spec: &BatchReadSpec) -> Result<BatchOutcome> {
        let mut outcome = Vec::with_capacity(spec.addresses().len());
        for (index, address) in spec.active_addresses().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = self
                .read_scaled(spec.slave(), address, spec.format(), spec.scale())
                .await;
            record_batch_result(&mut outcome, address, result)?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::tests::{read_response, slave, write_response},
        Error,
    };
    use assert_matches::assert_matches;
    use tokio::io::DuplexStream;

    /// Answers each request read from `device` with the next scripted response.
    ///
    /// An empty response means "stay silent".
    fn spawn_device(mut device: DuplexStream, script: Vec<(usize, Vec<u8>)>) {
        tokio::spawn(async move {
            for (request_len, response) in script {
                let mut request = vec![0u8; request_len];
                if device.read_exact(&mut request).await.is_err() {
                    return;
                }
                if !response.is_empty() {
                    let _ = device.write_all(&response).await;
                }
            }
            // Keep the link open so silence is observed as a timeout.
            let mut sink = [0u8; 64];
            while let Ok(n) = device.read(&mut sink).await {
                if n == 0 {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn read_scaled_over_stream() {
        let (client, device) = tokio::io::duplex(256);
        spawn_device(device, vec![(8, read_response(1, &[0x42, 0xF6, 0xE6, 0x66]))]);
        let mut meter = ForceMeter::new(client);
        let reading = meter
            .read_scaled(slave(1), 0x0010, ValueFormat::Float, ScaleFactor::default())
            .await
            .unwrap();
        assert!((reading.scaled - 12.345).abs() < 1e-4);
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let (client, device) = tokio::io::duplex(256);
        spawn_device(device, vec![(8, Vec::new())]);
        let mut meter = ForceMeter::new(client);
        meter.set_timeout(Duration::from_millis(50));
        assert_matches!(
            meter.read_value(slave(1), 16, ValueFormat::Signed).await,
            Err(Error::Timeout)
        );
    }

    #[tokio::test]
    async fn batch_with_partial_failures() {
        let (client, device) = tokio::io::duplex(256);
        spawn_device(
            device,
            vec![
                (8, read_response(1, &[0x00, 0x00, 0x00, 0x64])),
                (8, Vec::new()),
            ],
        );
        let mut meter = ForceMeter::new(client);
        meter.set_timeout(Duration::from_millis(50));
        let spec = BatchReadSpec::new(
            slave(1),
            vec![2000, 0, 2004, 0, 0, 0, 0, 0],
            ScaleFactor::default(),
            ValueFormat::Signed,
        )
        .unwrap();
        let outcome = meter.read_batch(&spec).await.unwrap();
        assert_eq!(outcome.len(), 2);
        assert_matches!(&outcome[0], (2000, Ok(reading)) if (reading.scaled - 10.0).abs() < 1e-9);
        assert_matches!(&outcome[1], (2004, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_address() {
        let (client, mut device) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut request = [0u8; 8];
            if device.read_exact(&mut request).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(80)).await;
            let _ = device
                .write_all(&read_response(1, &[0x00, 0x00, 0x03, 0xE7]))
                .await;
            // Silent for every further request.
            let mut sink = [0u8; 64];
            while let Ok(n) = device.read(&mut sink).await {
                if n == 0 {
                    break;
                }
            }
        });
        let mut meter = ForceMeter::new(client);
        meter.set_timeout(Duration::from_millis(50));
        let spec = BatchReadSpec::new(
            slave(1),
            vec![2000, 2004],
            ScaleFactor::try_from(1.0f64).unwrap(),
            ValueFormat::Signed,
        )
        .unwrap();
        let outcome = meter.read_batch(&spec).await.unwrap();
        assert_eq!(outcome.len(), 2);
        assert_matches!(outcome[0], (2000, Err(Error::Timeout)));
        assert_matches!(outcome[1], (2004, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn buffered_bytes_are_dropped_before_a_request() {
        let (client, mut device) = tokio::io::duplex(256);
        device.write_all(&[0x01, 0x03, 0x04]).await.unwrap();
        spawn_device(device, vec![(8, read_response(1, &[0x00, 0x00, 0x00, 0x2A]))]);
        let mut meter = ForceMeter::new(client);
        assert_eq!(
            meter.read_value(slave(1), 16, ValueFormat::Unsigned).await.unwrap(),
            Value32::Unsigned(42)
        );
    }

    #[tokio::test]
    async fn batch_aborts_when_the_link_closes() {
        let (client, mut device) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut request = [0u8; 8];
            if device.read_exact(&mut request).await.is_ok() {
                let _ = device
                    .write_all(&read_response(1, &[0x00, 0x00, 0x00, 0x01]))
                    .await;
            }
        });
        let mut meter = ForceMeter::new(client);
        meter.set_timeout(Duration::from_millis(50));
        let spec = BatchReadSpec::new(
            slave(1),
            vec![2000, 2002, 2004],
            ScaleFactor::default(),
            ValueFormat::Unsigned,
        )
        .unwrap();
        assert_matches!(meter.read_batch(&spec).await, Err(Error::Transport(..)));
    }

    #[tokio::test]
    async fn write_echo_mismatch() {
        let (client, device) = tokio::io::duplex(256);
        spawn_device(device, vec![(13, write_response(1, 0x0015, 2))]);
        let mut meter = ForceMeter::new(client);
        assert_matches!(
            meter
                .write_value(slave(1), 0x0014, Value32::Float(500.0))
                .await,
            Err(Error::AddressMismatch {
                expected: 0x0014,
                received: 0x0015
            })
        );
    }
}
