//! # Dynamic window approach
//!
//! Searches the space of (linear, angular) velocities reachable within one control period for
//! the command which best advances the vehicle towards the local goal without hitting anything.
//!
//! The search runs in four stages:
//!
//! 1. The dynamic window is the intersection of the absolute speed limits with the velocities
//!    reachable from the current command in one period under the acceleration limits.
//! 2. The window is sampled on a fixed resolution grid, both bounds included.
//! 3. For each sample a trajectory is simulated over the prediction horizon with unicycle
//!    kinematics, starting at the Robot Body frame origin.
//! 4. Trajectories passing closer to an obstacle than the footprint are discarded, the rest are
//!    scored on heading error to the goal, clearance and speed. The cheapest wins, ties going to
//!    the faster sample and then to the first sampled.
//!
//! If nothing is feasible the search returns the stop command rather than the least bad motion.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::nav::VelocityCmd;
use log::trace;
use nalgebra::Vector2;
use ordered_float::NotNan;
use serde::Serialize;

use crate::{loc::Pose, obstacles::ObstacleSet};
use util::maths::{clamp, wrap_pi};

pub use params::{DwaParams, Footprint};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Tolerance used when comparing against window bounds.
const WINDOW_EPSILON: f64 = 1e-9;

/// Smallest clearance used in the clearance cost, prevents division by zero.
const MIN_CLEARANCE_M: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The range of velocities admissible in the next control period.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct DynamicWindow {
    pub min_v_ms: f64,
    pub max_v_ms: f64,
    pub min_w_rads: f64,
    pub max_w_rads: f64,
}

/// The velocity search, holding its parameters.
#[derive(Debug, Clone)]
pub struct VelocitySearch {
    params: DwaParams,
}

/// Output of one search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// The selected command
    pub velocity: VelocityCmd,

    /// The simulated trajectory of the selected command, in the Robot Body frame
    pub trajectory: Vec<Pose>,

    /// Whether a feasible command was found
    pub status: SearchStatus,

    /// Cost of the selected command, `None` for the fallback
    pub cost: Option<f64>,

    /// Number of sampled velocities
    pub num_candidates: usize,

    /// Number of sampled velocities with collision free trajectories
    pub num_feasible: usize,
}

/// A scored feasible candidate.
struct Candidate {
    velocity: VelocityCmd,
    trajectory: Vec<Pose>,
    cost: NotNan<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SearchStatus {
    Feasible,

    /// Every candidate collided, the stop command was returned
    NoFeasibleVelocity,
}

#[derive(Debug, thiserror::Error)]
pub enum DwaError {
    #[error("Invalid DWA parameters: {0}")]
    InvalidParams(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DynamicWindow {
    /// Compute the window reachable from `current` in one control period.
    ///
    /// If the current command lies outside the absolute limits the window collapses onto the
    /// nearest limit.
    pub fn calculate(current: &VelocityCmd, params: &DwaParams) -> Self {
        let dv = params.max_accel_mss * params.dt_s;
        let dw = params.max_delta_yaw_rate_radss * params.dt_s;

        let (v_lo, v_hi) = (params.min_speed_ms, params.max_speed_ms);
        let (w_lo, w_hi) = (-params.max_yaw_rate_rads, params.max_yaw_rate_rads);

        Self {
            min_v_ms: clamp(current.linear_ms - dv, v_lo, v_hi),
            max_v_ms: clamp(current.linear_ms + dv, v_lo, v_hi),
            min_w_rads: clamp(current.angular_rads - dw, w_lo, w_hi),
            max_w_rads: clamp(current.angular_rads + dw, w_lo, w_hi),
        }
    }

    /// True if the command lies within the window.
    pub fn contains(&self, cmd: &VelocityCmd) -> bool {
        cmd.linear_ms >= self.min_v_ms - WINDOW_EPSILON
            && cmd.linear_ms <= self.max_v_ms + WINDOW_EPSILON
            && cmd.angular_rads >= self.min_w_rads - WINDOW_EPSILON
            && cmd.angular_rads <= self.max_w_rads + WINDOW_EPSILON
    }
}

impl VelocitySearch {
    pub fn new(params: DwaParams) -> Result<Self, DwaError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &DwaParams {
        &self.params
    }

    /// Find the best command from `current` towards `local_goal_m` (Robot Body frame) given the
    /// obstacle set.
    pub fn search(
        &self,
        current: &VelocityCmd,
        local_goal_m: &Vector2<f64>,
        obstacles: &ObstacleSet,
    ) -> SearchResult {
        let window = DynamicWindow::calculate(current, &self.params);

        let v_samples = sample_range(
            window.min_v_ms,
            window.max_v_ms,
            self.params.v_resolution_ms,
        );
        let w_samples = sample_range(
            window.min_w_rads,
            window.max_w_rads,
            self.params.yaw_rate_resolution_rads,
        );

        let mut best: Option<Candidate> = None;
        let mut num_candidates = 0;
        let mut num_feasible = 0;

        for v in v_samples.iter() {
            for w in w_samples.iter() {
                num_candidates += 1;

                let velocity = VelocityCmd {
                    linear_ms: *v,
                    angular_rads: *w,
                };
                let trajectory = self.simulate(&velocity);

                let cost = match self
                    .evaluate(&trajectory, &velocity, local_goal_m, obstacles)
                    .and_then(|c| NotNan::new(c).ok())
                {
                    Some(c) => c,
                    None => continue,
                };
                num_feasible += 1;

                // Strict comparisons keep the earliest sample on a full tie
                let is_better = match best {
                    None => true,
                    Some(ref b) => {
                        cost < b.cost
                            || (cost == b.cost && velocity.linear_ms > b.velocity.linear_ms)
                    }
                };

                if is_better {
                    best = Some(Candidate {
                        velocity,
                        trajectory,
                        cost,
                    });
                }
            }
        }

        trace!(
            "DWA window {:?}: {} of {} candidates feasible",
            window,
            num_feasible,
            num_candidates
        );

        match best {
            Some(b) => SearchResult {
                velocity: b.velocity,
                trajectory: b.trajectory,
                status: SearchStatus::Feasible,
                cost: Some(b.cost.into_inner()),
                num_candidates,
                num_feasible,
            },
            None => SearchResult {
                velocity: VelocityCmd::zero(),
                trajectory: self.simulate(&VelocityCmd::zero()),
                status: SearchStatus::NoFeasibleVelocity,
                cost: None,
                num_candidates,
                num_feasible,
            },
        }
    }

    /// Simulate the trajectory of a constant command over the prediction horizon, starting from
    /// the Robot Body frame origin. The start pose is included.
    pub fn simulate(&self, cmd: &VelocityCmd) -> Vec<Pose> {
        let dt = self.params.dt_s;
        let num_steps = self.params.num_sim_steps();

        let mut trajectory = Vec::with_capacity(num_steps + 1);
        let mut pose = Pose::default();
        trajectory.push(pose);

        for _ in 0..num_steps {
            let (sin, cos) = pose.heading_rad.sin_cos();
            pose.position_m.x += cmd.linear_ms * cos * dt;
            pose.position_m.y += cmd.linear_ms * sin * dt;
            pose.heading_rad += cmd.angular_rads * dt;
            trajectory.push(pose);
        }

        trajectory
    }

    /// Minimum distance between the trajectory and the obstacles, or `None` if the footprint hits
    /// an obstacle anywhere along the trajectory.
    pub fn min_clearance(&self, trajectory: &[Pose], obstacles: &ObstacleSet) -> Option<f64> {
        let mut min_dist_m = std::f64::INFINITY;

        for pose in trajectory {
            for point in obstacles.points() {
                let dist_m = pose.distance_to(point);

                if self.params.footprint.collides(pose, point, dist_m) {
                    return None;
                }

                min_dist_m = min_dist_m.min(dist_m);
            }
        }

        Some(min_dist_m)
    }

    /// Cost of a trajectory, `None` if it is infeasible.
    fn evaluate(
        &self,
        trajectory: &[Pose],
        cmd: &VelocityCmd,
        local_goal_m: &Vector2<f64>,
        obstacles: &ObstacleSet,
    ) -> Option<f64> {
        let min_dist_m = self.min_clearance(trajectory, obstacles)?;
        let end = trajectory.last()?;

        let to_goal_cost = self.params.to_goal_cost_gain * heading_error(end, local_goal_m);
        let speed_cost = self.params.speed_cost_gain * (self.params.max_speed_ms - cmd.linear_ms);
        let obstacle_cost = self.params.obstacle_cost_gain / min_dist_m.max(MIN_CLEARANCE_M);

        Some(to_goal_cost + speed_cost + obstacle_cost)
    }
}

impl Footprint {
    /// True if `point` lies strictly within the footprint placed at `pose`. A point on the edge
    /// of the footprint doesn't collide. `dist_m` is the distance between the pose and the point.
    pub fn collides(&self, pose: &Pose, point: &Vector2<f64>, dist_m: f64) -> bool {
        match *self {
            Footprint::Circle { radius_m } => dist_m < radius_m,
            Footprint::Rectangle { length_m, width_m } => {
                // Can't be inside if at or beyond the corners
                if dist_m >= 0.5 * length_m.hypot(width_m) {
                    return false;
                }

                let local = pose.point_to_local(point);
                local.x.abs() < 0.5 * length_m && local.y.abs() < 0.5 * width_m
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Absolute angle between the heading of `pose` and the direction from `pose` to `goal_m`.
pub fn heading_error(pose: &Pose, goal_m: &Vector2<f64>) -> f64 {
    let diff = goal_m - pose.position_m;
    wrap_pi(diff.y.atan2(diff.x) - pose.heading_rad).abs()
}

/// Sample `[lo, hi]` every `resolution`, always including both bounds.
fn sample_range(lo: f64, hi: f64, resolution: f64) -> Vec<f64> {
    let num_steps = ((hi - lo) / resolution + WINDOW_EPSILON).floor().max(0.0) as usize;

    let mut samples: Vec<f64> = (0..=num_steps)
        .map(|i| lo + i as f64 * resolution)
        .collect();

    if hi - lo > num_steps as f64 * resolution + WINDOW_EPSILON {
        samples.push(hi);
    }

    samples
}

#[cfg(test)]
mod test {
    use super::params::test_params;
    use super::*;
    use crate::{follow::advance, path::Path};

    fn search() -> VelocitySearch {
        VelocitySearch::new(test_params()).unwrap()
    }

    fn rectangle_search() -> VelocitySearch {
        let mut params = test_params();
        params.footprint = Footprint::Rectangle {
            length_m: 0.6,
            width_m: 0.5,
        };
        VelocitySearch::new(params).unwrap()
    }

    /// True if the footprint hits any obstacle point anywhere along the trajectory
    fn hits_along(search: &VelocitySearch, trajectory: &[Pose], obstacles: &ObstacleSet) -> bool {
        let footprint = search.params().footprint;

        trajectory.iter().any(|pose| {
            obstacles
                .points()
                .iter()
                .any(|p| footprint.collides(pose, p, pose.distance_to(p)))
        })
    }

    fn cmd(linear_ms: f64, angular_rads: f64) -> VelocityCmd {
        VelocityCmd {
            linear_ms,
            angular_rads,
        }
    }

    /// Small deterministic generator for sweeping inputs
    struct XorShift(u64);

    impl XorShift {
        fn next_f64(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }

        fn range(&mut self, lo: f64, hi: f64) -> f64 {
            lo + (hi - lo) * self.next_f64()
        }
    }

    #[test]
    fn test_dynamic_window() {
        let params = test_params();

        let window = DynamicWindow::calculate(&cmd(0.5, 0.0), &params);
        assert!((window.min_v_ms - 0.48).abs() < 1e-12);
        assert!((window.max_v_ms - 0.52).abs() < 1e-12);
        assert!((window.max_w_rads - 4f64.to_radians()).abs() < 1e-12);
        assert!((window.min_w_rads + 4f64.to_radians()).abs() < 1e-12);

        // Clipped by the absolute limits
        let window = DynamicWindow::calculate(&cmd(0.99, 0.69), &params);
        assert_eq!(window.max_v_ms, 1.0);
        assert_eq!(window.max_w_rads, 40f64.to_radians());

        // Outside of the limits collapses onto the limit
        let window = DynamicWindow::calculate(&cmd(3.0, 0.0), &params);
        assert_eq!(window.min_v_ms, 1.0);
        assert_eq!(window.max_v_ms, 1.0);
        assert!(window.contains(&cmd(1.0, 0.0)));
        assert!(!window.contains(&cmd(0.9, 0.0)));
    }

    #[test]
    fn test_sample_range() {
        let s = sample_range(0.0, 0.04, 0.01);
        assert_eq!(s.len(), 5);
        assert_eq!(s[0], 0.0);
        assert!((s[4] - 0.04).abs() < 1e-12);

        // Bound that isn't a multiple of the resolution is still sampled
        let s = sample_range(0.0, 0.025, 0.01);
        assert_eq!(s.len(), 4);
        assert_eq!(s[3], 0.025);

        assert_eq!(sample_range(1.0, 1.0, 0.01), vec![1.0]);
    }

    #[test]
    fn test_simulate() {
        let search = search();

        let traj = search.simulate(&cmd(1.0, 0.0));
        assert_eq!(traj.len(), 31);
        assert_eq!(traj[0], Pose::default());
        assert!((traj[30].position_m - Vector2::new(3.0, 0.0)).norm() < 1e-9);

        // Pure rotation stays in place
        let traj = search.simulate(&cmd(0.0, 0.5));
        assert!(traj[30].position_m.norm() < 1e-12);
        assert!((traj[30].heading_rad - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_free_space_straight_ahead() {
        let search = search();

        // Straight 10 waypoint path, no obstacles
        let path = Path::new((0..10).map(|i| Vector2::new(i as f64, 0.0)).collect()).unwrap();
        let follow = advance(&path, &Pose::default(), 0, search.params().lookahead_threshold_m());
        let result = search.search(&cmd(0.5, 0.0), &follow.local_goal_m, &ObstacleSet::empty());

        assert_eq!(result.status, SearchStatus::Feasible);
        assert!((result.velocity.linear_ms - 0.52).abs() < 1e-9);
        assert!(result.velocity.angular_rads.abs() < 1e-9);
        assert_eq!(result.trajectory.len(), 31);
        assert_eq!(result.num_feasible, result.num_candidates);
    }

    #[test]
    fn test_obstacle_ahead() {
        let search = search();
        let obstacles = ObstacleSet::from_points(vec![Vector2::new(0.31, 0.0)]);

        // From rest every forward motion brings the obstacle inside the footprint
        let result = search.search(&cmd(0.0, 0.0), &Vector2::new(3.0, 0.0), &obstacles);
        assert_eq!(result.status, SearchStatus::Feasible);
        assert!(result.velocity.linear_ms <= 0.0);
        assert!(search.min_clearance(&result.trajectory, &obstacles).unwrap() >= 0.3);

        // Already moving forwards the whole window collides, so stop
        let result = search.search(&cmd(0.5, 0.0), &Vector2::new(3.0, 0.0), &obstacles);
        assert_eq!(result.status, SearchStatus::NoFeasibleVelocity);
        assert!(result.velocity.is_zero());
        assert_eq!(result.cost, None);
        assert_eq!(result.num_feasible, 0);
        assert!(result.trajectory.iter().all(|p| *p == Pose::default()));
    }

    #[test]
    fn test_avoids_obstacle() {
        let mut params = test_params();
        params.max_delta_yaw_rate_radss = 4.0;
        let search = VelocitySearch::new(params).unwrap();

        // Obstacle on the direct route
        let obstacles = ObstacleSet::from_points(vec![Vector2::new(1.2, 0.0)]);
        let result = search.search(&cmd(0.5, 0.0), &Vector2::new(3.0, 0.0), &obstacles);

        assert_eq!(result.status, SearchStatus::Feasible);
        assert!(result.velocity.angular_rads.abs() > 1e-6);
        assert!(search.min_clearance(&result.trajectory, &obstacles).unwrap() >= 0.3);
    }

    #[test]
    fn test_rectangle_footprint() {
        let footprint = Footprint::Rectangle {
            length_m: 0.6,
            width_m: 0.4,
        };
        let pose = Pose::default();

        let check = |x: f64, y: f64| {
            let p = Vector2::new(x, y);
            footprint.collides(&pose, &p, pose.distance_to(&p))
        };

        assert!(check(0.0, 0.15));
        assert!(check(0.29, -0.19));
        assert!(!check(0.0, 0.25));
        assert!(!check(0.35, 0.0));

        // Rotated a quarter turn the long axis is along Y
        let rotated = Pose::new(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let p = Vector2::new(0.0, 0.25);
        assert!(footprint.collides(&rotated, &p, rotated.distance_to(&p)));
    }

    #[test]
    fn test_footprint_edge() {
        let pose = Pose::default();
        let rectangle = Footprint::Rectangle {
            length_m: 0.6,
            width_m: 0.4,
        };
        let circle = Footprint::Circle { radius_m: 0.3 };

        // Points exactly on the edge are clear for both shapes
        for p in [Vector2::new(0.3, 0.0), Vector2::new(0.0, 0.2)].iter() {
            assert!(!rectangle.collides(&pose, p, pose.distance_to(p)));
        }
        let p = Vector2::new(0.3, 0.0);
        assert!(!circle.collides(&pose, &p, pose.distance_to(&p)));

        // And just inside they aren't
        let p = Vector2::new(0.2999, 0.0);
        assert!(rectangle.collides(&pose, &p, pose.distance_to(&p)));
        assert!(circle.collides(&pose, &p, pose.distance_to(&p)));
    }

    #[test]
    fn test_rectangle_obstacle_ahead() {
        let search = rectangle_search();
        let obstacles = ObstacleSet::from_points(vec![Vector2::new(0.31, 0.0)]);

        // From rest only turning on the spot or reversing keeps the nose clear
        let result = search.search(&cmd(0.0, 0.0), &Vector2::new(3.0, 0.0), &obstacles);
        assert_eq!(result.status, SearchStatus::Feasible);
        assert!(result.velocity.linear_ms < 1e-9);
        assert!(!hits_along(&search, &result.trajectory, &obstacles));

        // Already moving forwards the whole window collides, so stop
        let result = search.search(&cmd(0.5, 0.0), &Vector2::new(3.0, 0.0), &obstacles);
        assert_eq!(result.status, SearchStatus::NoFeasibleVelocity);
        assert!(result.velocity.is_zero());
        assert_eq!(result.num_feasible, 0);

        // Beside the vehicle, outside the half width, doesn't block forward motion
        let obstacles = ObstacleSet::from_points(vec![Vector2::new(0.0, 0.26)]);
        let result = search.search(&cmd(0.5, 0.0), &Vector2::new(3.0, 0.0), &obstacles);
        assert_eq!(result.status, SearchStatus::Feasible);
        assert!(result.velocity.linear_ms > 0.4);
        assert!(!hits_along(&search, &result.trajectory, &obstacles));
    }

    #[test]
    fn test_tie_break() {
        let mut params = test_params();
        params.to_goal_cost_gain = 0.0;
        params.speed_cost_gain = 0.0;
        params.obstacle_cost_gain = 0.0;
        let search = VelocitySearch::new(params).unwrap();

        // Every candidate costs zero, so the fastest and then first sampled wins
        let result = search.search(&cmd(0.5, 0.0), &Vector2::new(3.0, 0.0), &ObstacleSet::empty());
        let window = DynamicWindow::calculate(&cmd(0.5, 0.0), search.params());

        assert!((result.velocity.linear_ms - window.max_v_ms).abs() < 1e-9);
        assert_eq!(result.velocity.angular_rads, window.min_w_rads);
    }

    #[test]
    fn test_search_properties() {
        let search = search();
        let params = test_params();
        let mut rng = XorShift(0x2545_f491_4f6c_dd1d);

        for _ in 0..50 {
            let current = cmd(rng.range(-0.5, 1.0), rng.range(-0.6, 0.6));
            let goal = Vector2::new(rng.range(-3.0, 3.0), rng.range(-3.0, 3.0));
            let obstacles = ObstacleSet::from_points(
                (0..10).map(|_| Vector2::new(rng.range(-3.0, 3.0), rng.range(-3.0, 3.0))),
            );

            let result = search.search(&current, &goal, &obstacles);
            let window = DynamicWindow::calculate(&current, &params);

            match result.status {
                SearchStatus::Feasible => {
                    assert!(window.contains(&result.velocity));
                    assert!(search.min_clearance(&result.trajectory, &obstacles).unwrap() >= 0.3);
                }
                SearchStatus::NoFeasibleVelocity => {
                    assert!(result.velocity.is_zero());
                }
            }

            // Same inputs, same answer
            let again = search.search(&current, &goal, &obstacles);
            assert_eq!(again.velocity, result.velocity);
        }
    }

    #[test]
    fn test_search_properties_rectangle() {
        let search = rectangle_search();
        let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
        let mut num_feasible = 0;

        for _ in 0..50 {
            let current = cmd(rng.range(-0.5, 1.0), rng.range(-0.6, 0.6));
            let goal = Vector2::new(rng.range(-3.0, 3.0), rng.range(-3.0, 3.0));
            let obstacles = ObstacleSet::from_points(
                (0..10).map(|_| Vector2::new(rng.range(-3.0, 3.0), rng.range(-3.0, 3.0))),
            );

            let result = search.search(&current, &goal, &obstacles);
            let window = DynamicWindow::calculate(&current, search.params());

            match result.status {
                SearchStatus::Feasible => {
                    num_feasible += 1;
                    assert!(window.contains(&result.velocity));
                    assert!(!hits_along(&search, &result.trajectory, &obstacles));
                    assert!(search.min_clearance(&result.trajectory, &obstacles).is_some());
                }
                SearchStatus::NoFeasibleVelocity => {
                    assert!(result.velocity.is_zero());
                    assert_eq!(result.num_feasible, 0);
                }
            }

            let again = search.search(&current, &goal, &obstacles);
            assert_eq!(again.velocity, result.velocity);
        }

        assert!(num_feasible > 0);
    }
}
