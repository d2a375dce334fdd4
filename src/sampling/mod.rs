//! Periodic sensor sampling
//!
//! [`scheduler`] drives the slow (environmental) and fast (motion) cycles;
//! [`sensors`] is the boundary to the board's sensor driver.

pub mod scheduler;
pub mod sensors;

pub use scheduler::{
    run_recurring, seed_values, FastCycle, RecurringCycle, SamplingScheduler, SchedulerSettings,
    SlowCycle, MIN_FAST_INTERVAL,
};
pub use sensors::{Orientation, Quantity, SensorError, SensorSource, SimulatedSensors};
