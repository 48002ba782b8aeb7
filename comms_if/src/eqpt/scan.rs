//! # Laser scan message

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single planar range scan, already parsed into polar samples.
///
/// Sample `i` was taken at bearing `angle_min_rad + i * angle_increment_rad` in the sensor frame,
/// which is assumed to coincide with the robot body frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserScan {
    /// UTC timestamp at which the scan was acquired
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Bearing of the first sample
    pub angle_min_rad: f64,

    /// Bearing difference between consecutive samples
    pub angle_increment_rad: f64,

    /// Measured ranges. Invalid returns may be given as infinite or NaN.
    pub ranges_m: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Scan angle parameters are not finite (min {0}, increment {1})")]
    NonFiniteAngles(f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LaserScan {
    /// Create a new scan stamped with the current time.
    pub fn new(angle_min_rad: f64, angle_increment_rad: f64, ranges_m: Vec<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            angle_min_rad,
            angle_increment_rad,
            ranges_m,
        }
    }

    /// Check the angular parameters of the scan can be used to compute bearings.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.angle_min_rad.is_finite() && self.angle_increment_rad.is_finite() {
            Ok(())
        } else {
            Err(ScanError::NonFiniteAngles(
                self.angle_min_rad,
                self.angle_increment_rad,
            ))
        }
    }

    /// Iterate over `(bearing_rad, range_m)` pairs.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges_m
            .iter()
            .enumerate()
            .map(move |(i, r)| (self.angle_min_rad + i as f64 * self.angle_increment_rad, *r))
    }
}
