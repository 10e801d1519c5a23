use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::ConfigError;

pub const DEFAULT_ALPHA: f64 = 0.9;
pub const DEFAULT_EPSILON: f64 = 0.001;
pub const DEFAULT_TICK_PERIOD_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationConfig {
    /// Weight kept by `current` on each tick.
    pub alpha: f64,
    /// Gap below which `current` snaps onto `target`.
    pub epsilon: f64,
    pub tick_period: Duration,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            epsilon: DEFAULT_EPSILON,
            tick_period: Duration::from_millis(DEFAULT_TICK_PERIOD_MS),
        }
    }
}

impl InterpolationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.alpha) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::Epsilon(self.epsilon));
        }
        if self.tick_period.is_zero() {
            return Err(ConfigError::TickPeriod);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatedValue {
    pub current: f64,
    pub target: f64,
}

impl InterpolatedValue {
    pub fn new(value: f64) -> Self {
        Self {
            current: value,
            target: value,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// First-order low-pass step. Returns `true` if `current` moved.
    ///
    /// Snaps onto `target` once the gap is under `epsilon`, or once rounding
    /// stops the step from closing the gap. Near large magnitudes one ULP
    /// can exceed `epsilon`.
    fn step(&mut self, alpha: f64, epsilon: f64) -> bool {
        if self.is_settled() {
            return false;
        }
        let gap = (self.current - self.target).abs();
        let next = self.current * alpha + self.target * (1.0 - alpha);
        if gap < epsilon || next == self.current || (next - self.target).abs() >= gap {
            self.current = self.target;
        } else {
            self.current = next;
        }
        true
    }
}

#[derive(Debug)]
pub struct ValueInterpolator {
    config: InterpolationConfig,
    axes: HashMap<String, InterpolatedValue>,
}

impl ValueInterpolator {
    pub fn new(config: InterpolationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            axes: HashMap::new(),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: InterpolationConfig::default(),
            axes: HashMap::new(),
        }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    pub fn track(&mut self, axis: impl Into<String>, initial: f64) {
        self.axes.insert(axis.into(), InterpolatedValue::new(initial));
    }

    /// Returns `false` if `axis` is not tracked.
    pub fn set_target(&mut self, axis: &str, value: f64) -> bool {
        match self.axes.get_mut(axis) {
            Some(interpolated) => {
                interpolated.target = value;
                true
            }
            None => {
                log::debug!("set_target on untracked axis {}", axis);
                false
            }
        }
    }

    /// Advances every unsettled axis by one step. Returns how many moved.
    pub fn tick(&mut self) -> usize {
        let InterpolationConfig { alpha, epsilon, .. } = self.config;
        self.axes
            .values_mut()
            .map(|value| value.step(alpha, epsilon))
            .filter(|moved| *moved)
            .count()
    }

    pub fn current(&self, axis: &str) -> Option<f64> {
        self.axes.get(axis).map(|v| v.current)
    }

    pub fn get(&self, axis: &str) -> Option<&InterpolatedValue> {
        self.axes.get(axis)
    }

    pub fn is_settled(&self) -> bool {
        self.axes.values().all(InterpolatedValue::is_settled)
    }
}

/// Interpolator shared between channel handlers and the tick task.
#[derive(Debug, Clone)]
pub struct SharedInterpolator {
    inner: Arc<Mutex<ValueInterpolator>>,
}

impl SharedInterpolator {
    pub fn new(interpolator: ValueInterpolator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(interpolator)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ValueInterpolator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(&self, axis: impl Into<String>, initial: f64) {
        self.lock().track(axis, initial);
    }

    pub fn set_target(&self, axis: &str, value: f64) -> bool {
        self.lock().set_target(axis, value)
    }

    pub fn tick(&self) -> usize {
        self.lock().tick()
    }

    pub fn current(&self, axis: &str) -> Option<f64> {
        self.lock().current(axis)
    }

    /// Ticks at the configured period until the returned handle is aborted.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let shared = self.clone();
        let period = self.lock().config().tick_period;

        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                shared.tick();
            }
        })
    }
}
