//! Linux sysfs GPIO: pins are exported as `<root>/gpioN/value` files which
//! are polled for level changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{emit, Edge, EdgeDetector, PinEvent, PinMap, PinWatcher};

pub struct SysfsWatcher {
    root: PathBuf,
    pins: PinMap,
    edge: Edge,
    debounce: Duration,
    poll_interval: Duration,
}

impl SysfsWatcher {
    pub fn new<P: AsRef<Path>>(
        root: P,
        pins: PinMap,
        edge: Edge,
        debounce: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pins,
            edge,
            debounce,
            poll_interval,
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    /// Export the pin (if needed) and make it an input.
    async fn setup_pin(&self, pin: u32) -> anyhow::Result<()> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            tokio::fs::write(self.root.join("export"), pin.to_string())
                .await
                .with_context(|| format!("Unable to export GPIO{}", pin))?;
        }
        let direction = dir.join("direction");
        if direction.exists() {
            tokio::fs::write(&direction, "in")
                .await
                .with_context(|| format!("Unable to set GPIO{} as input", pin))?;
        }
        info!("GPIO{} configured as input", pin);
        Ok(())
    }

    async fn read_level(&self, pin: u32) -> anyhow::Result<bool> {
        let path = self.pin_dir(pin).join("value");
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Unable to read {}", path.display()))?;
        Ok(raw.trim() == "1")
    }
}

#[async_trait]
impl PinWatcher for SysfsWatcher {
    async fn run(self: Box<Self>, events: mpsc::Sender<PinEvent>) -> anyhow::Result<()> {
        let mut detectors = BTreeMap::new();
        for pin in self.pins.pins() {
            self.setup_pin(pin).await?;
            detectors.insert(pin, EdgeDetector::new(self.edge, self.debounce));
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (pin, detector) in detectors.iter_mut() {
                let level = match self.read_level(*pin).await {
                    Ok(level) => level,
                    Err(err) => {
                        warn!("{:#}", err);
                        continue;
                    }
                };
                if detector.update(level, Instant::now()) && !emit(&self.pins, *pin, &events).await {
                    return Ok(());
                }
            }
        }
    }
}
