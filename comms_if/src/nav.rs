//! # Navigation output messages

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A body-frame velocity demand for the drive system.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityCmd {
    /// Forward speed in meters/second. Positive is "forwards".
    pub linear_ms: f64,

    /// Turn rate in radians/second.
    ///
    /// Follows the right hand rule about the robot's Z+ (upwards) axis, so that a positive turn
    /// rate will rotate the robot to the left.
    pub angular_rads: f64,
}

/// The lookahead waypoint currently targeted by the local planner.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalGoal {
    /// Index of the waypoint in the reference path
    pub index: usize,

    /// Position of the waypoint in the world frame, `[x, y]`
    pub position_m_world: [f64; 2],

    /// Position of the waypoint in the robot body frame, `[x, y]`
    pub position_m_robot: [f64; 2],
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VelocityCmd {
    /// The stop command.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.linear_ms == 0.0 && self.angular_rads == 0.0
    }
}
