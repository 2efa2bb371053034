//! Pin edge monitoring.
//!
//! Each monitored pin starts one program on its configured edge. The
//! hardware side is behind [`PinWatcher`]; on machines without GPIO a no-op
//! watcher is used and the rest of the gate works unchanged.

#[cfg(target_os = "linux")]
mod rpi;
mod sysfs;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::GpioConfig;
use crate::controller::SwitchController;
use crate::consts::SYSFS_GPIO_ROOT;
use crate::pattern::ProgramId;

#[cfg(target_os = "linux")]
pub use rpi::RpiWatcher;
pub use sysfs::SysfsWatcher;

/// Which level transitions trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Low -> high.
    #[default]
    Rising,
    /// High -> low.
    Falling,
    Both,
}

impl Edge {
    fn matches(self, from: bool, to: bool) -> bool {
        match self {
            Edge::Rising => !from && to,
            Edge::Falling => from && !to,
            Edge::Both => from != to,
        }
    }
}

/// Internal bias resistor for input pins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    Up,
    /// Pairs with rising edges on switches wired to 3V3.
    #[default]
    Down,
    /// External resistors only.
    Off,
}

/// Pin -> program table.
#[derive(Debug, Clone, Default)]
pub struct PinMap {
    pins: BTreeMap<u32, ProgramId>,
}

impl PinMap {
    pub fn new(pins: BTreeMap<u32, ProgramId>) -> Self {
        Self { pins }
    }

    pub fn program_for(&self, pin: u32) -> Option<ProgramId> {
        self.pins.get(&pin).copied()
    }

    pub fn pins(&self) -> Vec<u32> {
        self.pins.keys().copied().collect()
    }

    pub fn entries(&self) -> BTreeMap<u32, ProgramId> {
        self.pins.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

/// A monitored pin fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub pin: u32,
    pub program: ProgramId,
}

/// Turns sampled levels into debounced edge events.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    edge: Edge,
    debounce: Duration,
    level: Option<bool>,
    last_fired: Option<Instant>,
}

impl EdgeDetector {
    pub fn new(edge: Edge, debounce: Duration) -> Self {
        Self {
            edge,
            debounce,
            level: None,
            last_fired: None,
        }
    }

    /// Feed a sample. Returns true when an event should fire.
    pub fn update(&mut self, level: bool, now: Instant) -> bool {
        let Some(previous) = self.level.replace(level) else {
            // First sample is the baseline.
            return false;
        };
        if !self.edge.matches(previous, level) {
            return false;
        }
        if let Some(last) = self.last_fired {
            if now.duration_since(last) < self.debounce {
                return false;
            }
        }
        self.last_fired = Some(now);
        true
    }
}

/// Source of pin events. Runs until the receiver goes away or the hardware
/// fails.
#[async_trait]
pub trait PinWatcher: Send {
    async fn run(self: Box<Self>, events: mpsc::Sender<PinEvent>) -> anyhow::Result<()>;
}

/// Used where no GPIO hardware is available.
#[derive(Debug, Default)]
pub struct NullWatcher;

#[async_trait]
impl PinWatcher for NullWatcher {
    async fn run(self: Box<Self>, _events: mpsc::Sender<PinEvent>) -> anyhow::Result<()> {
        warn!("GPIO not available, pin monitoring disabled");
        Ok(())
    }
}

/// Forward an edge on `pin`. Returns false once nobody listens anymore.
async fn emit(pins: &PinMap, pin: u32, events: &mpsc::Sender<PinEvent>) -> bool {
    let Some(program) = pins.program_for(pin) else {
        warn!("Edge on unmapped GPIO{}", pin);
        return true;
    };
    info!("GPIO{} changed -> program '{}'", pin, program);
    if events.send(PinEvent { pin, program }).await.is_err() {
        debug!("Pin event receiver closed, stopping GPIO monitor");
        return false;
    }
    true
}

/// Start the program for every pin event until the watcher stops or
/// `shutdown` flips. Failures are logged and the loop keeps going.
pub async fn dispatch(
    mut events: mpsc::Receiver<PinEvent>,
    controller: SwitchController,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(PinEvent { pin, program }) = event else {
                    info!("GPIO watcher finished");
                    break;
                };
                if controller.switch_program(program).await.is_err() {
                    warn!("GPIO{} edge did not switch program '{}'", pin, program);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("GPIO dispatch finishing");
}

/// Pick the watcher for this machine: the GPIO character device when it can
/// be opened, sysfs otherwise, nothing when neither is there.
pub fn detect(config: &GpioConfig) -> Box<dyn PinWatcher> {
    if !config.enabled {
        info!("GPIO disabled in configuration");
        return Box::new(NullWatcher);
    }

    info!(
        "Monitoring pins {:?} (edge: {:?}, pull: {:?}, debounce: {}ms)",
        config.pins.keys().collect::<Vec<_>>(),
        config.edge,
        config.pull,
        config.debounce_ms
    );
    let pins = PinMap::new(config.pins.clone());
    let debounce = Duration::from_millis(config.debounce_ms);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    if let Some(watcher) = open_chip(&pins, config, debounce, poll_interval) {
        return watcher;
    }

    if !Path::new(SYSFS_GPIO_ROOT).exists() {
        warn!("{} not found, running without GPIO", SYSFS_GPIO_ROOT);
        return Box::new(NullWatcher);
    }
    if config.pull != Pull::Off {
        warn!("sysfs GPIO cannot set pull resistors, pull: {:?} ignored", config.pull);
    }
    Box::new(SysfsWatcher::new(
        SYSFS_GPIO_ROOT,
        pins,
        config.edge,
        debounce,
        poll_interval,
    ))
}

#[cfg(target_os = "linux")]
fn open_chip(
    pins: &PinMap,
    config: &GpioConfig,
    debounce: Duration,
    poll_interval: Duration,
) -> Option<Box<dyn PinWatcher>> {
    match RpiWatcher::open(pins.clone(), config.edge, config.pull, debounce, poll_interval) {
        Ok(watcher) => Some(Box::new(watcher)),
        Err(err) => {
            warn!("GPIO chip not usable ({:#}), trying sysfs", err);
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_chip(
    _pins: &PinMap,
    _config: &GpioConfig,
    _debounce: Duration,
    _poll_interval: Duration,
) -> Option<Box<dyn PinWatcher>> {
    None
}
