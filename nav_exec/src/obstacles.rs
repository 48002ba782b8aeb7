//! # Obstacle buffer
//!
//! Converts laser scans into a set of obstacle points in the Robot Body frame. Only returns closer
//! than the lookahead threshold are kept, which bounds the cost of the velocity search.
//!
//! Scans are ingested by the sensor side while the control loop takes snapshots, so the buffer is
//! guarded by its own lock, separate from the control loop's. A new set is built outside the lock
//! and swapped in whole, so a snapshot never sees a partially built set.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, MutexGuard};

use comms_if::eqpt::scan::{LaserScan, ScanError};
use log::trace;
use nalgebra::Vector2;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Far away point which is always part of an obstacle set, so the search never runs on an empty
/// set.
pub const SENTINEL_POINT_M: [f64; 2] = [100.0, 100.0];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An immutable set of obstacle points in the Robot Body frame.
///
/// Cloning a set is cheap, the points are shared.
#[derive(Debug, Clone)]
pub struct ObstacleSet(Arc<Vec<Vector2<f64>>>);

/// Double-buffered store of the latest obstacle set.
#[derive(Debug)]
pub struct ObstacleBuffer {
    /// Maximum range of returns to keep
    threshold_m: f64,

    current: Mutex<ObstacleSet>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ObstacleSet {
    /// Create a set containing only the sentinel point.
    pub fn empty() -> Self {
        Self::from_points(std::iter::empty())
    }

    /// Create a set from the given points plus the sentinel point.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Vector2<f64>>,
    {
        let mut set = vec![Vector2::new(SENTINEL_POINT_M[0], SENTINEL_POINT_M[1])];
        set.extend(points);
        Self(Arc::new(set))
    }

    pub fn points(&self) -> &[Vector2<f64>] {
        &self.0
    }

    /// Number of points, including the sentinel
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if only the sentinel point is present
    pub fn is_empty(&self) -> bool {
        self.0.len() <= 1
    }
}

impl ObstacleBuffer {
    pub fn new(threshold_m: f64) -> Self {
        Self {
            threshold_m,
            current: Mutex::new(ObstacleSet::empty()),
        }
    }

    /// Replace the obstacle set with the returns of a new scan.
    pub fn ingest_scan(&self, scan: &LaserScan) -> Result<(), ScanError> {
        scan.validate()?;
        self.store(scan.samples(), scan.ranges_m.len());
        Ok(())
    }

    /// Replace the obstacle set with the given polar samples.
    ///
    /// Sample `i` is taken at bearing `angle_min_rad + i * angle_increment_rad`. Samples at or
    /// beyond the threshold, and invalid (non-finite or negative) samples, are discarded.
    pub fn ingest(&self, ranges_m: &[f64], angle_min_rad: f64, angle_increment_rad: f64) {
        let samples = ranges_m
            .iter()
            .enumerate()
            .map(|(i, r)| (angle_min_rad + i as f64 * angle_increment_rad, *r));

        self.store(samples, ranges_m.len());
    }

    /// Get the latest obstacle set.
    pub fn snapshot(&self) -> ObstacleSet {
        self.lock().clone()
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// Build a set from `(bearing_rad, range_m)` samples and swap it in.
    fn store<I>(&self, samples: I, num_samples: usize)
    where
        I: Iterator<Item = (f64, f64)>,
    {
        let threshold_m = self.threshold_m;

        let set = ObstacleSet::from_points(samples.filter_map(|(bearing_rad, r)| {
            if r.is_finite() && r >= 0.0 && r < threshold_m {
                Some(Vector2::new(r * bearing_rad.cos(), r * bearing_rad.sin()))
            } else {
                None
            }
        }));

        trace!("Ingested {} of {} scan returns", set.len() - 1, num_samples);

        *self.lock() = set;
    }

    fn lock(&self) -> MutexGuard<'_, ObstacleSet> {
        // The set is only ever replaced whole, so a poisoned lock still holds a complete set
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
