//! # Path follower
//!
//! Selects the local goal for the velocity search by walking a lookahead index along the reference
//! path. Starting from the previous goal, the index is advanced past every waypoint that is within
//! the lookahead threshold of the vehicle. The first waypoint outside the threshold (or the final
//! waypoint) becomes the goal. The index only ever increases during an episode, so the vehicle
//! can't be pulled backwards along the path if it drifts.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::nav::LocalGoal;
use nalgebra::Vector2;

use crate::{loc::Pose, path::Path};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Result of advancing along the path.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FollowOutput {
    /// Index of the selected waypoint
    pub goal_index: usize,

    /// Selected waypoint in the World frame
    pub goal_m_world: Vector2<f64>,

    /// Selected waypoint in the Robot Body frame, the local goal for the velocity search
    pub local_goal_m: Vector2<f64>,

    /// Distance from the vehicle to the final waypoint of the path
    pub remaining_m: f64,
}

/// Stateful follower of a single path, holding the lookahead index for one episode.
#[derive(Debug, Clone)]
pub struct PathFollower {
    path: Path,
    goal_index: usize,
    threshold_m: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FollowOutput {
    /// Build the local goal message for this output.
    pub fn local_goal_msg(&self) -> LocalGoal {
        LocalGoal {
            index: self.goal_index,
            position_m_world: [self.goal_m_world.x, self.goal_m_world.y],
            position_m_robot: [self.local_goal_m.x, self.local_goal_m.y],
        }
    }
}

impl PathFollower {
    pub fn new(path: Path, threshold_m: f64) -> Self {
        Self {
            path,
            goal_index: 0,
            threshold_m,
        }
    }

    /// Advance the goal index for the given pose.
    pub fn step(&mut self, pose: &Pose) -> FollowOutput {
        let out = advance(&self.path, pose, self.goal_index, self.threshold_m);
        self.goal_index = out.goal_index;
        out
    }

    pub fn goal_index(&self) -> usize {
        self.goal_index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Advance the lookahead index along `path` from `from_index`.
///
/// The returned goal index is never less than `from_index` (unless `from_index` is past the end of
/// the path, in which case the final index is used) and never greater than the final index.
pub fn advance(path: &Path, pose: &Pose, from_index: usize, threshold_m: f64) -> FollowOutput {
    let last_index = path.last_index();
    let mut goal_index = from_index.min(last_index);

    while goal_index < last_index && pose.distance_to(&path.points()[goal_index]) < threshold_m {
        goal_index += 1;
    }

    let goal_m_world = path.points()[goal_index];

    FollowOutput {
        goal_index,
        goal_m_world,
        local_goal_m: pose.point_to_local(&goal_m_world),
        remaining_m: pose.distance_to(path.last_point()),
    }
}
