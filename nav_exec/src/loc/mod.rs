//! # Localisation module
//!
//! The local planner doesn't localise the vehicle itself, it polls an external [`PoseSource`]
//! once per control cycle. The [`PoseTracker`] wraps that source so that a late or failed lookup
//! never stalls or stops the control loop: the last known pose is used instead and the tracker is
//! marked as stale until the source recovers.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Duration;

use log::{info, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pose (position and heading) of the vehicle.
///
/// Poses produced by a [`PoseSource`] are in the World (W) frame. Poses along a simulated
/// trajectory are in the Robot Body (RB) frame of the pose the simulation started from.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Pose {
    /// The position in meters
    pub position_m: Vector2<f64>,

    /// The heading (angle to the positive X axis) in radians
    pub heading_rad: f64,
}

/// Provides an interface for the localisation system of the vehicle.
pub struct PoseTracker {
    source: Box<dyn PoseSource>,

    /// Maximum time to wait for the source on each lookup
    timeout: Duration,

    /// The last pose successfully obtained from the source
    last_pose: Option<Pose>,

    /// Number of consecutive failed lookups
    num_consec_failures: u64,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// An external source of world-frame poses, for example a localisation filter.
pub trait PoseSource: Send {
    /// Get the latest pose, waiting at most `timeout` for it to become available.
    fn lookup_pose(&mut self, timeout: Duration) -> Result<Pose, LocError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LocError {
    #[error("Pose lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pose source unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            position_m: Vector2::new(x_m, y_m),
            heading_rad,
        }
    }

    /// Euclidian distance between this pose's position and the given point.
    pub fn distance_to(&self, point_m: &Vector2<f64>) -> f64 {
        (point_m - self.position_m).norm()
    }

    /// Express a point given in the parent frame of this pose in the frame of this pose.
    pub fn point_to_local(&self, point_m: &Vector2<f64>) -> Vector2<f64> {
        let diff = point_m - self.position_m;
        let (sin, cos) = self.heading_rad.sin_cos();

        Vector2::new(cos * diff.x + sin * diff.y, -sin * diff.x + cos * diff.y)
    }

}

impl PoseTracker {
    pub fn new(source: Box<dyn PoseSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            last_pose: None,
            num_consec_failures: 0,
        }
    }

    /// Get the current pose from the source.
    ///
    /// If the lookup fails the last known pose is returned instead, so the returned pose may be
    /// stale (see [`PoseTracker::is_stale`]). `None` is only returned if the source has never
    /// produced a pose.
    pub fn current_pose(&mut self) -> Option<Pose> {
        match self.source.lookup_pose(self.timeout) {
            Ok(pose) => {
                if self.num_consec_failures > 0 {
                    info!(
                        "Pose source recovered after {} failed lookups",
                        self.num_consec_failures
                    );
                }
                self.num_consec_failures = 0;
                self.last_pose = Some(pose);
            }
            Err(e) => {
                // Only warn on the first failure, the source may be down for many cycles
                if self.num_consec_failures == 0 {
                    warn!("Could not get pose, using last known pose: {}", e);
                }
                self.num_consec_failures += 1;
            }
        }

        self.last_pose
    }

    /// True if the most recent lookup failed.
    pub fn is_stale(&self) -> bool {
        self.num_consec_failures > 0
    }
}
