//! Dual-rate sampling scheduler
//!
//! Two self-rescheduling cycles share the cooperative runtime thread:
//!
//! ```text
//! slow (fixed period)      : temperature, humidity, pressure
//! fast (/config/fast_interval): gyroscope, accelerometer, compass
//! ```
//!
//! Each cycle is armed, fires, runs its body and only then re-arms with the
//! delay the body returned. The next tick is therefore scheduled relative to
//! the end of the previous one, so slow sampling stretches the real cadence.

use super::sensors::{Orientation, Quantity, SensorError, SensorSource};
use crate::node::{paths, NodeStore, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Body of a recurring timer
pub trait RecurringCycle: Send + 'static {
    fn name(&self) -> &'static str;

    /// Sample and publish once; returns the delay before the next tick
    fn tick(&mut self) -> Duration;
}

/// Arm, fire, run, re-arm until `stop` is cancelled
pub async fn run_recurring<C: RecurringCycle>(
    mut cycle: C,
    initial_delay: Duration,
    stop: CancellationToken,
) {
    info!("Starting {} cycle", cycle.name());
    let mut delay = initial_delay;

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                info!("Stopping {} cycle", cycle.name());
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        delay = cycle.tick();
        trace!("{} cycle re-armed in {:?}", cycle.name(), delay);
    }
}

/// Environmental values on a fixed period
pub struct SlowCycle {
    store: Arc<dyn NodeStore>,
    sensors: Arc<dyn SensorSource>,
    period: Duration,
}

impl SlowCycle {
    pub fn new(store: Arc<dyn NodeStore>, sensors: Arc<dyn SensorSource>, period: Duration) -> Self {
        Self {
            store,
            sensors,
            period,
        }
    }
}

impl RecurringCycle for SlowCycle {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn tick(&mut self) -> Duration {
        let sensors = &self.sensors;
        sample_scalar(self.store.as_ref(), paths::TEMPERATURE, Quantity::Temperature, || {
            sensors.sample_temperature()
        });
        sample_scalar(self.store.as_ref(), paths::HUMIDITY, Quantity::Humidity, || {
            sensors.sample_humidity()
        });
        sample_scalar(self.store.as_ref(), paths::PRESSURE, Quantity::Pressure, || {
            sensors.sample_pressure()
        });
        self.period
    }
}

const GYROSCOPE_PATHS: [&str; 3] = [
    paths::GYROSCOPE_PITCH,
    paths::GYROSCOPE_ROLL,
    paths::GYROSCOPE_YAW,
];

const ACCELEROMETER_PATHS: [&str; 3] = [
    paths::ACCELEROMETER_PITCH,
    paths::ACCELEROMETER_ROLL,
    paths::ACCELEROMETER_YAW,
];

/// Floor for the fast cycle so a tiny interval cannot monopolize the runtime thread
pub const MIN_FAST_INTERVAL: Duration = Duration::from_millis(1);

/// Motion and orientation values; the interval is re-read after every tick
pub struct FastCycle {
    store: Arc<dyn NodeStore>,
    sensors: Arc<dyn SensorSource>,
    default_interval: Duration,
    warned_invalid: bool,
}

impl FastCycle {
    pub fn new(
        store: Arc<dyn NodeStore>,
        sensors: Arc<dyn SensorSource>,
        default_interval: Duration,
    ) -> Self {
        Self {
            store,
            sensors,
            default_interval,
            warned_invalid: false,
        }
    }

    /// Interval currently held by the configuration node
    ///
    /// Missing, non-numeric, non-finite or non-positive values fall back to the
    /// default; positive values below [`MIN_FAST_INTERVAL`] are raised to it.
    pub fn current_interval(&mut self) -> Duration {
        let configured = self.store.get_value(paths::FAST_INTERVAL);
        let parsed = configured
            .as_ref()
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        match parsed {
            Some(interval) if interval >= MIN_FAST_INTERVAL => {
                self.warned_invalid = false;
                interval
            }
            Some(_) => {
                self.warn_once(&configured, MIN_FAST_INTERVAL);
                MIN_FAST_INTERVAL
            }
            None => {
                self.warn_once(&configured, self.default_interval);
                self.default_interval
            }
        }
    }

    fn warn_once(&mut self, configured: &Option<Value>, using: Duration) {
        if !self.warned_invalid {
            warn!(
                "Fast interval {:?} is not a number of seconds >= {:?}, using {:?}",
                configured, MIN_FAST_INTERVAL, using
            );
            self.warned_invalid = true;
        }
    }
}

impl RecurringCycle for FastCycle {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn tick(&mut self) -> Duration {
        let sensors = &self.sensors;
        sample_orientation(self.store.as_ref(), GYROSCOPE_PATHS, Quantity::Gyroscope, || {
            sensors.sample_gyroscope()
        });
        sample_orientation(
            self.store.as_ref(),
            ACCELEROMETER_PATHS,
            Quantity::Accelerometer,
            || sensors.sample_accelerometer(),
        );
        sample_scalar(self.store.as_ref(), paths::COMPASS, Quantity::Compass, || {
            sensors.sample_compass()
        });
        self.current_interval()
    }
}

/// Sample only when watched; a failed sample is logged and skipped
fn sample_scalar(
    store: &dyn NodeStore,
    path: &str,
    quantity: Quantity,
    sample: impl FnOnce() -> Result<f64, SensorError>,
) {
    if !store.is_subscribed(path) {
        return;
    }
    match sample() {
        Ok(value) => store.publish(path, Value::Number(value)),
        Err(e) => warn!("Skipping {} this tick: {}", quantity, e),
    }
}

fn sample_orientation(
    store: &dyn NodeStore,
    axes: [&str; 3],
    quantity: Quantity,
    sample: impl FnOnce() -> Result<Orientation, SensorError>,
) {
    let watched: Vec<bool> = axes.iter().map(|path| store.is_subscribed(path)).collect();
    if !watched.iter().any(|w| *w) {
        return;
    }

    let orientation = match sample() {
        Ok(orientation) => orientation,
        Err(e) => {
            warn!("Skipping {} this tick: {}", quantity, e);
            return;
        }
    };

    let values = [orientation.pitch, orientation.roll, orientation.yaw];
    for ((path, value), watched) in axes.iter().zip(values).zip(watched) {
        if watched {
            store.publish(path, Value::Number(value));
        }
    }
}

/// Publish one reading of every quantity, regardless of subscriptions
///
/// Gives every sensor node an initial value at startup.
pub fn seed_values(store: &dyn NodeStore, sensors: &dyn SensorSource) {
    let scalars: [(&str, Quantity, Result<f64, SensorError>); 4] = [
        (paths::TEMPERATURE, Quantity::Temperature, sensors.sample_temperature()),
        (paths::HUMIDITY, Quantity::Humidity, sensors.sample_humidity()),
        (paths::PRESSURE, Quantity::Pressure, sensors.sample_pressure()),
        (paths::COMPASS, Quantity::Compass, sensors.sample_compass()),
    ];
    for (path, quantity, reading) in scalars {
        match reading {
            Ok(value) => store.publish(path, Value::Number(value)),
            Err(e) => warn!("No initial {}: {}", quantity, e),
        }
    }

    for (axes, quantity, reading) in [
        (GYROSCOPE_PATHS, Quantity::Gyroscope, sensors.sample_gyroscope()),
        (ACCELEROMETER_PATHS, Quantity::Accelerometer, sensors.sample_accelerometer()),
    ] {
        match reading {
            Ok(o) => {
                for (path, value) in axes.iter().zip([o.pitch, o.roll, o.yaw]) {
                    store.publish(path, Value::Number(value));
                }
            }
            Err(e) => warn!("No initial {}: {}", quantity, e),
        }
    }
    debug!("Seeded initial sensor values");
}

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub slow_interval: Duration,
    pub fast_initial_delay: Duration,
    pub fast_default_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            slow_interval: Duration::from_millis(500),
            fast_initial_delay: Duration::from_millis(10),
            fast_default_interval: Duration::from_millis(50),
        }
    }
}

/// Both sampling cycles running as tasks on the current runtime
pub struct SamplingScheduler {
    slow: JoinHandle<()>,
    fast: JoinHandle<()>,
}

impl SamplingScheduler {
    /// Must be called from within a tokio runtime
    pub fn spawn(
        settings: SchedulerSettings,
        store: Arc<dyn NodeStore>,
        sensors: Arc<dyn SensorSource>,
        stop: CancellationToken,
    ) -> Self {
        info!("Spawning sampling scheduler with settings: {:?}", settings);

        let slow = SlowCycle::new(store.clone(), sensors.clone(), settings.slow_interval);
        let fast = FastCycle::new(store, sensors, settings.fast_default_interval);

        Self {
            slow: tokio::spawn(run_recurring(slow, settings.slow_interval, stop.clone())),
            fast: tokio::spawn(run_recurring(fast, settings.fast_initial_delay, stop)),
        }
    }

    /// Wait for both cycles to finish after the stop token fired
    pub async fn join(self) {
        for (name, handle) in [("slow", self.slow), ("fast", self.fast)] {
            if let Err(e) = handle.await {
                warn!("{} cycle task failed: {}", name, e);
            }
        }
    }
}
