//! Raspberry Pi GPIO through rppal. Unlike sysfs it can set the pull
//! resistor of each input.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use rppal::gpio::{Gpio, InputPin};
use tokio::sync::mpsc;
use tracing::info;

use super::{emit, Edge, EdgeDetector, PinEvent, PinMap, PinWatcher, Pull};

pub struct RpiWatcher {
    gpio: Gpio,
    pins: PinMap,
    bcm: Vec<(u32, u8)>,
    edge: Edge,
    pull: Pull,
    debounce: Duration,
    poll_interval: Duration,
}

/// BCM numbers as rppal wants them.
fn bcm_numbers(pins: &PinMap) -> anyhow::Result<Vec<(u32, u8)>> {
    pins.pins()
        .into_iter()
        .map(|pin| {
            u8::try_from(pin)
                .map(|bcm| (pin, bcm))
                .with_context(|| format!("GPIO{} is not a valid BCM pin", pin))
        })
        .collect()
}

impl RpiWatcher {
    pub fn open(
        pins: PinMap,
        edge: Edge,
        pull: Pull,
        debounce: Duration,
        poll_interval: Duration,
    ) -> anyhow::Result<Self> {
        let bcm = bcm_numbers(&pins)?;
        let gpio = Gpio::new().context("Unable to open GPIO")?;
        Ok(Self {
            gpio,
            pins,
            bcm,
            edge,
            pull,
            debounce,
            poll_interval,
        })
    }

    fn setup_pin(&self, pin: u32, bcm: u8) -> anyhow::Result<InputPin> {
        let raw = self
            .gpio
            .get(bcm)
            .with_context(|| format!("Unable to claim GPIO{}", pin))?;
        let input = match self.pull {
            Pull::Up => raw.into_input_pullup(),
            Pull::Down => raw.into_input_pulldown(),
            Pull::Off => raw.into_input(),
        };
        info!("GPIO{} configured as input (pull: {:?})", pin, self.pull);
        Ok(input)
    }
}

#[async_trait]
impl PinWatcher for RpiWatcher {
    async fn run(self: Box<Self>, events: mpsc::Sender<PinEvent>) -> anyhow::Result<()> {
        let mut inputs = Vec::with_capacity(self.bcm.len());
        for (pin, bcm) in &self.bcm {
            let input = self.setup_pin(*pin, *bcm)?;
            inputs.push((*pin, input, EdgeDetector::new(self.edge, self.debounce)));
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (pin, input, detector) in inputs.iter_mut() {
                if detector.update(input.is_high(), Instant::now())
                    && !emit(&self.pins, *pin, &events).await
                {
                    return Ok(());
                }
            }
        }
    }
}
