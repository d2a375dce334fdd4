//! Sensor boundary
//!
//! The physical sensor library lives outside this crate; the scheduler only
//! sees [`SensorSource`]. [`SimulatedSensors`] stands in for it when no board
//! driver is wired up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Temperature,
    Humidity,
    Pressure,
    Gyroscope,
    Accelerometer,
    Compass,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::Pressure => "pressure",
            Quantity::Gyroscope => "gyroscope",
            Quantity::Accelerometer => "accelerometer",
            Quantity::Compass => "compass",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("{quantity} unavailable: {reason}")]
    Unavailable { quantity: Quantity, reason: String },
}

/// Sampling interface of the board's sensors
///
/// Calls are expected to return quickly; they run on the cooperative scheduler
/// thread.
pub trait SensorSource: Send + Sync {
    /// Degrees Celsius
    fn sample_temperature(&self) -> Result<f64, SensorError>;

    /// Relative humidity in percent
    fn sample_humidity(&self) -> Result<f64, SensorError>;

    /// Millibars
    fn sample_pressure(&self) -> Result<f64, SensorError>;

    fn sample_gyroscope(&self) -> Result<Orientation, SensorError>;

    fn sample_accelerometer(&self) -> Result<Orientation, SensorError>;

    /// Degrees from north
    fn sample_compass(&self) -> Result<f64, SensorError>;
}

/// Smoothly varying readings derived from the time since creation
#[derive(Debug, Clone)]
pub struct SimulatedSensors {
    started: Instant,
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensors {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn wave(&self, base: f64, amplitude: f64, period_secs: f64) -> f64 {
        base + amplitude * (self.elapsed() * std::f64::consts::TAU / period_secs).sin()
    }

    fn heading(&self, degrees_per_sec: f64) -> f64 {
        (self.elapsed() * degrees_per_sec).rem_euclid(360.0)
    }
}

impl SensorSource for SimulatedSensors {
    fn sample_temperature(&self) -> Result<f64, SensorError> {
        Ok(self.wave(21.0, 1.5, 120.0))
    }

    fn sample_humidity(&self) -> Result<f64, SensorError> {
        Ok(self.wave(45.0, 5.0, 300.0))
    }

    fn sample_pressure(&self) -> Result<f64, SensorError> {
        Ok(self.wave(1013.25, 2.0, 600.0))
    }

    fn sample_gyroscope(&self) -> Result<Orientation, SensorError> {
        Ok(Orientation {
            pitch: self.wave(0.0, 15.0, 8.0).rem_euclid(360.0),
            roll: self.wave(0.0, 10.0, 11.0).rem_euclid(360.0),
            yaw: self.heading(12.0),
        })
    }

    fn sample_accelerometer(&self) -> Result<Orientation, SensorError> {
        Ok(Orientation {
            pitch: self.wave(0.0, 5.0, 13.0).rem_euclid(360.0),
            roll: self.wave(0.0, 5.0, 17.0).rem_euclid(360.0),
            yaw: self.heading(12.0),
        })
    }

    fn sample_compass(&self) -> Result<f64, SensorError> {
        Ok(self.heading(12.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_readings_stay_in_range() {
        let sensors = SimulatedSensors::new();

        let temperature = sensors.sample_temperature().unwrap();
        assert!((19.0..=23.0).contains(&temperature));

        let humidity = sensors.sample_humidity().unwrap();
        assert!((0.0..=100.0).contains(&humidity));

        let compass = sensors.sample_compass().unwrap();
        assert!((0.0..=360.0).contains(&compass));

        let gyro = sensors.sample_gyroscope().unwrap();
        for angle in [gyro.pitch, gyro.roll, gyro.yaw] {
            assert!((0.0..=360.0).contains(&angle));
        }
    }

    #[test]
    fn sensor_error_names_the_quantity() {
        let err = SensorError::Unavailable {
            quantity: Quantity::Pressure,
            reason: "i2c timeout".to_string(),
        };
        assert_eq!(err.to_string(), "pressure unavailable: i2c timeout");
    }
}
