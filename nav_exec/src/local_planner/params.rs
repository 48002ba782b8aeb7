//! Local planner parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

use super::LocalPlannerError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the local planner control loop
#[derive(Deserialize, Debug, Clone)]
pub struct LocalPlannerParams {
    /// Distance to the final waypoint below which the episode is complete
    pub arrive_tolerance_m: f64,

    /// Number of ticks without enough progress after which a replan is requested
    pub stagnation_limit: u64,

    /// The goal index must advance by more than this many waypoints to count as progress
    pub progress_delta: usize,

    /// Weight of the new command when blending with the previous one. 1.0 disables blending.
    pub blend_alpha: f64,

    /// Target period of one tick
    pub tick_period_s: f64,

    /// Maximum time to wait on the pose source each tick
    pub pose_timeout_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LocalPlannerParams {
    pub fn validate(&self) -> Result<(), LocalPlannerError> {
        if !(self.arrive_tolerance_m > 0.0) {
            return Err(LocalPlannerError::InvalidParams(format!(
                "arrive_tolerance_m must be positive, got {}",
                self.arrive_tolerance_m
            )));
        }

        if !(self.blend_alpha > 0.0 && self.blend_alpha <= 1.0) {
            return Err(LocalPlannerError::InvalidParams(format!(
                "blend_alpha must be in (0, 1], got {}",
                self.blend_alpha
            )));
        }

        if !(self.tick_period_s > 0.0 && self.tick_period_s.is_finite()) {
            return Err(LocalPlannerError::InvalidParams(format!(
                "tick_period_s must be positive, got {}",
                self.tick_period_s
            )));
        }

        if !(self.pose_timeout_s >= 0.0 && self.pose_timeout_s.is_finite()) {
            return Err(LocalPlannerError::InvalidParams(format!(
                "pose_timeout_s must not be negative, got {}",
                self.pose_timeout_s
            )));
        }

        Ok(())
    }
}

/// Parameters used by the unit tests of this crate, ticking fast so tests don't take long.
#[cfg(test)]
pub(crate) fn test_params() -> LocalPlannerParams {
    LocalPlannerParams {
        arrive_tolerance_m: 0.2,
        stagnation_limit: 50,
        progress_delta: 3,
        blend_alpha: 0.7,
        tick_period_s: 0.001,
        pose_timeout_s: 0.01,
    }
}
