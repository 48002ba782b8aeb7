//! # Path
//!
//! This module defines the reference path followed by the local planner. Paths are produced by the
//! global planner, are given in the World frame, and are never modified once installed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An ordered, non-empty sequence of waypoints defining the desired route of the vehicle.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Path {
    points_m: Vec<Vector2<f64>>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Attempted to create a path from an empty sequence")]
    EmptySequence,

    #[error("Waypoint {0} is not finite")]
    NonFinitePoint(usize),

    #[error("Point separation must be positive, got {0}")]
    InvalidSeparation(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Path {
    /// Create a new path from a list of waypoints.
    pub fn new(points_m: Vec<Vector2<f64>>) -> Result<Self, PathError> {
        if points_m.is_empty() {
            return Err(PathError::EmptySequence);
        }

        if let Some(i) = points_m.iter().position(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(PathError::NonFinitePoint(i));
        }

        Ok(Self { points_m })
    }

    /// Produces a direct path between the two position vectors, with each point in the path having
    /// at most the given separation. Both `from` and `to` are included in the path.
    pub fn direct(
        from: Vector2<f64>,
        to: Vector2<f64>,
        point_sep_m: f64,
    ) -> Result<Self, PathError> {
        if !(point_sep_m > 0.0) {
            return Err(PathError::InvalidSeparation(point_sep_m));
        }

        let diff_vec = to - from;
        let dist = diff_vec.norm();

        // Number of segments needed so that none is longer than the separation
        let num_segments = (dist / point_sep_m).ceil().max(1.0) as usize;

        let points_m = (0..=num_segments)
            .map(|i| from + diff_vec * (i as f64 / num_segments as f64))
            .collect();

        Self::new(points_m)
    }

    /// Get the final point in the path
    pub fn last_point(&self) -> &Vector2<f64> {
        // Paths are never empty
        &self.points_m[self.points_m.len() - 1]
    }

    /// Index of the final point in the path
    pub fn last_index(&self) -> usize {
        self.points_m.len() - 1
    }

    /// Get the number of points in the path
    pub fn get_num_points(&self) -> usize {
        self.points_m.len()
    }

    /// Get all points in the path
    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points_m
    }

    /// Return the length of the path in meters.
    pub fn get_length(&self) -> f64 {
        self.points_m
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new() {
        assert!(matches!(Path::new(vec![]), Err(PathError::EmptySequence)));
        assert!(matches!(
            Path::new(vec![Vector2::new(0.0, 0.0), Vector2::new(std::f64::NAN, 0.0)]),
            Err(PathError::NonFinitePoint(1))
        ));

        let path = Path::new(vec![Vector2::new(1.0, 1.0)]).unwrap();
        assert_eq!(path.get_num_points(), 1);
        assert_eq!(path.last_index(), 0);
        assert_eq!(path.last_point(), &Vector2::new(1.0, 1.0));
        assert_eq!(path.get_length(), 0.0);
    }

    #[test]
    fn test_direct() {
        let path = Path::direct(Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), 0.3).unwrap();

        // 1 m at 0.3 m spacing needs 4 segments
        assert_eq!(path.get_num_points(), 5);
        assert_eq!(path.points()[0], Vector2::new(0.0, 0.0));
        assert_eq!(path.last_point(), &Vector2::new(1.0, 0.0));
        assert!((path.get_length() - 1.0).abs() < 1e-12);
        for w in path.points().windows(2) {
            assert!((w[1] - w[0]).norm() <= 0.3);
        }

        // Coincident ends still give a valid path
        let path = Path::direct(Vector2::new(2.0, 2.0), Vector2::new(2.0, 2.0), 0.3).unwrap();
        assert_eq!(path.get_num_points(), 2);

        assert!(Path::direct(Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), 0.0).is_err());
    }
}
