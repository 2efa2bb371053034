use crate::consts;
use crate::gpio::{Edge, Pull};
use crate::pattern::ProgramId;
use crate::payload::CommandPayload;
use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_port() -> u16 {
    consts::DEFAULT_DEVICE_PORT
}
fn default_connect_timeout_ms() -> u64 {
    consts::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}
fn default_io_timeout_ms() -> u64 {
    consts::DEFAULT_IO_TIMEOUT.as_millis() as u64
}
fn default_response_timeout_ms() -> u64 {
    consts::DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64
}
fn default_connect_retries() -> u32 {
    consts::DEFAULT_CONNECT_RETRIES
}
fn default_connect_retry_delay_ms() -> u64 {
    consts::DEFAULT_CONNECT_RETRY_DELAY.as_millis() as u64
}
fn default_send_retries() -> u32 {
    consts::DEFAULT_SEND_RETRIES
}
fn default_send_retry_delay_ms() -> u64 {
    consts::DEFAULT_SEND_RETRY_DELAY.as_millis() as u64
}
fn default_debounce_ms() -> u64 {
    consts::DEFAULT_DEBOUNCE_MS
}
fn default_poll_interval_ms() -> u64 {
    consts::DEFAULT_POLL_INTERVAL_MS
}
fn default_bind() -> String {
    consts::DEFAULT_HTTP_BIND.to_string()
}

/// TBBOX connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sent right after every connect.
    pub login: CommandPayload,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// How long to wait for an (optional) answer after each command.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    #[serde(default = "default_send_retry_delay_ms")]
    pub send_retry_delay_ms: u64,
}

impl DeviceConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }
}

/// Playlist transport commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlsConfig {
    pub pause: CommandPayload,
    pub resume: CommandPayload,
    pub stop: CommandPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpioConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub edge: Edge,
    /// Bias resistor; only applied where the GPIO backend supports it.
    #[serde(default)]
    pub pull: Pull,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// BCM pin number -> program started on its edge.
    #[serde(default)]
    pub pins: BTreeMap<u32, ProgramId>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            edge: Edge::default(),
            pull: Pull::default(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            pins: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default log directive; RUST_LOG wins when set.
    #[serde(default)]
    pub log_level: Option<String>,
    pub device: DeviceConfig,
    pub programs: HashMap<ProgramId, CommandPayload>,
    pub controls: ControlsConfig,
    /// Volume percent -> command.
    #[serde(default)]
    pub volume: BTreeMap<u16, CommandPayload>,
    /// Optional pattern -> program override file. Relative to the config file.
    #[serde(default)]
    pub switch_mapping: Option<PathBuf>,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let filename = filename.as_ref();
        let handle = File::open(filename)
            .with_context(|| format!("Unable to open config file {}", filename.display()))?;
        let mut data: Config = serde_yaml::from_reader(handle)
            .with_context(|| format!("Invalid config file {}", filename.display()))?;

        if let (Some(mapping), Some(base)) = (&data.switch_mapping, filename.parent()) {
            if mapping.is_relative() {
                data.switch_mapping = Some(base.join(mapping));
            }
        }
        data.validate()?;

        Ok(data)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device.connect_retries == 0 || self.device.send_retries == 0 {
            anyhow::bail!("Retry counts must be at least 1");
        }
        if self.gpio.enabled && self.gpio.pins.is_empty() {
            anyhow::bail!("GPIO is enabled but no pins are configured");
        }
        Ok(())
    }
}
