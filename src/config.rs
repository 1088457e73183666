use anyhow::{Context, Result};
use forcemeter_lib::{
    protocol::{
        BatchReadSpec, BaudRate, RegisterAddress, ScaleFactor, SlaveAddress, ValueFormat,
    },
    transport::{Parity, SerialSettings},
};
use serde::Deserialize;
use std::{fs::File, path::Path, time::Duration};

pub const DEFAULT_CONFIG_FILE: &str = "forcemeter.yml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: BaudRate,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let settings = SerialSettings::default();
        Self {
            device: String::from("/dev/ttyUSB0"),
            baud_rate: settings.baud_rate,
            data_bits: settings.data_bits,
            parity: settings.parity,
            stop_bits: settings.stop_bits,
            timeout: Duration::from_secs(1),
            delay: Duration::from_millis(5),
        }
    }
}

impl SerialConfig {
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub slave: SlaveAddress,
    pub scale: ScaleFactor,
    pub format: ValueFormat,
    pub addresses: Vec<RegisterAddress>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            slave: SlaveAddress::default(),
            scale: ScaleFactor::default(),
            format: ValueFormat::Float,
            addresses: vec![2000, 2002, 2004, 2006, 0, 0, 0, 0],
        }
    }
}

impl BatchConfig {
    pub fn to_spec(&self) -> forcemeter_lib::Result<BatchReadSpec> {
        BatchReadSpec::new(self.slave, self.addresses.clone(), self.scale, self.format)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub serial: SerialConfig,
    pub batch: BatchConfig,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            batch: BatchConfig::default(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {path:?}");
        let file = File::open(path)
            .with_context(|| format!("Cannot open config file {}", path.display()))?;
        let config: Config = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.batch.to_spec().context("Invalid batch configuration")?;
        if !matches!(self.serial.data_bits, 7 | 8) {
            anyhow::bail!("Unsupported number of data bits: {}", self.serial.data_bits);
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            anyhow::bail!("Unsupported number of stop bits: {}", self.serial.stop_bits);
        }
        Ok(())
    }
}
