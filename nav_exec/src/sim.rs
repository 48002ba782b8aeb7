//! # Simulated collaborators
//!
//! A minimal world for running the local planner without a vehicle: a unicycle integrating the
//! published velocity, circular obstacles seen by a simulated laser, a pose source reading the
//! simulated pose and a replan service producing direct paths to the goal.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{mpsc::Sender, Arc, Mutex, MutexGuard},
    time::Duration,
};

use comms_if::{
    eqpt::scan::LaserScan,
    nav::{LocalGoal, VelocityCmd},
};
use log::{debug, trace};
use nalgebra::Vector2;
use serde::Deserialize;

use crate::{
    loc::{LocError, Pose, PoseSource},
    local_planner::{NavOutput, ReplanError, ReplanService},
    path::{Path, PathError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the simulated world
#[derive(Deserialize, Debug, Clone)]
pub struct SimParams {
    /// Starting position of the vehicle
    pub start_m: [f64; 2],

    /// Starting heading of the vehicle
    pub start_heading_rad: f64,

    /// Goal position
    pub goal_m: [f64; 2],

    /// Separation of the points in the paths given to the planner
    pub path_separation_m: f64,

    /// If set, every Nth pose lookup fails
    pub pose_dropout_period: Option<u64>,

    pub scan: ScanParams,

    #[serde(default)]
    pub obstacles: Vec<CircleObstacle>,
}

/// Parameters of the simulated laser
#[derive(Deserialize, Debug, Clone)]
pub struct ScanParams {
    pub angle_min_rad: f64,
    pub angle_max_rad: f64,
    pub angle_increment_rad: f64,
    pub max_range_m: f64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CircleObstacle {
    pub centre_m: [f64; 2],
    pub radius_m: f64,
}

/// The simulated world. Clones share the same state.
#[derive(Debug, Clone)]
pub struct SimWorld {
    params: Arc<SimParams>,
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug)]
struct SimState {
    pose: Pose,
    velocity: VelocityCmd,
    local_goal: Option<LocalGoal>,
    num_lookups: u64,
    num_replans: u64,
}

/// Pose source reading the simulated pose.
pub struct SimPoseSource(SimWorld);

/// Output driving the simulated vehicle.
pub struct SimOutput(SimWorld);

/// Replan service sending a direct path from the current pose to the goal.
pub struct SimReplan {
    world: SimWorld,
    path_sender: Sender<Path>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Invalid simulation parameters: {0}")]
    InvalidParams(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimParams {
    /// Check the parameters describe a world which can be simulated.
    pub fn validate(&self) -> Result<(), SimError> {
        let sp = &self.scan;

        if !(sp.angle_increment_rad > 0.0 && sp.angle_increment_rad.is_finite()) {
            return Err(SimError::InvalidParams(format!(
                "scan.angle_increment_rad must be positive, got {}",
                sp.angle_increment_rad
            )));
        }

        if !(sp.angle_min_rad.is_finite()
            && sp.angle_max_rad.is_finite()
            && sp.angle_max_rad >= sp.angle_min_rad)
        {
            return Err(SimError::InvalidParams(format!(
                "scan angles must be finite with max >= min, got [{}, {}]",
                sp.angle_min_rad, sp.angle_max_rad
            )));
        }

        if !(sp.max_range_m > 0.0) {
            return Err(SimError::InvalidParams(format!(
                "scan.max_range_m must be positive, got {}",
                sp.max_range_m
            )));
        }

        if !(self.path_separation_m > 0.0 && self.path_separation_m.is_finite()) {
            return Err(SimError::InvalidParams(format!(
                "path_separation_m must be positive, got {}",
                self.path_separation_m
            )));
        }

        if let Some(o) = self.obstacles.iter().find(|o| !(o.radius_m > 0.0)) {
            return Err(SimError::InvalidParams(format!(
                "Obstacle at {:?} has a non-positive radius",
                o.centre_m
            )));
        }

        Ok(())
    }
}

impl SimWorld {
    pub fn new(params: SimParams) -> Result<Self, SimError> {
        params.validate()?;

        let pose = Pose::new(params.start_m[0], params.start_m[1], params.start_heading_rad);

        Ok(Self {
            params: Arc::new(params),
            state: Arc::new(Mutex::new(SimState {
                pose,
                velocity: VelocityCmd::zero(),
                local_goal: None,
                num_lookups: 0,
                num_replans: 0,
            })),
        })
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn pose(&self) -> Pose {
        self.lock().pose
    }

    /// The last local goal published by the planner.
    pub fn local_goal(&self) -> Option<LocalGoal> {
        self.lock().local_goal
    }

    pub fn num_replans(&self) -> u64 {
        self.lock().num_replans
    }

    pub fn goal_m(&self) -> Vector2<f64> {
        Vector2::new(self.params.goal_m[0], self.params.goal_m[1])
    }

    /// Integrate the current velocity over `dt_s`.
    pub fn step(&self, dt_s: f64) {
        let mut state = self.lock();
        let (sin, cos) = state.pose.heading_rad.sin_cos();
        let v = state.velocity;

        state.pose.position_m.x += v.linear_ms * cos * dt_s;
        state.pose.position_m.y += v.linear_ms * sin * dt_s;
        state.pose.heading_rad =
            util::maths::wrap_pi(state.pose.heading_rad + v.angular_rads * dt_s);
    }

    /// Direct path from the current position to the goal.
    pub fn path_to_goal(&self) -> Result<Path, PathError> {
        Path::direct(
            self.pose().position_m,
            self.goal_m(),
            self.params.path_separation_m,
        )
    }

    /// Distance from the vehicle to the closest obstacle edge, negative if inside one.
    pub fn min_clearance_m(&self) -> f64 {
        let pose = self.pose();

        self.params
            .obstacles
            .iter()
            .map(|o| pose.distance_to(&Vector2::new(o.centre_m[0], o.centre_m[1])) - o.radius_m)
            .fold(std::f64::INFINITY, f64::min)
    }

    /// Simulate a laser scan from the current pose.
    ///
    /// Beams which don't hit anything within range return infinity.
    pub fn scan(&self) -> LaserScan {
        let pose = self.pose();
        let sp = &self.params.scan;

        let num_beams =
            ((sp.angle_max_rad - sp.angle_min_rad) / sp.angle_increment_rad).floor() as usize + 1;

        let ranges_m = (0..num_beams)
            .map(|i| {
                let bearing =
                    pose.heading_rad + sp.angle_min_rad + i as f64 * sp.angle_increment_rad;
                let dir = Vector2::new(bearing.cos(), bearing.sin());

                self.params
                    .obstacles
                    .iter()
                    .filter_map(|o| ray_circle(&pose.position_m, &dir, o))
                    .filter(|r| *r <= sp.max_range_m)
                    .fold(std::f64::INFINITY, f64::min)
            })
            .collect();

        LaserScan::new(sp.angle_min_rad, sp.angle_increment_rad, ranges_m)
    }

    pub fn pose_source(&self) -> SimPoseSource {
        SimPoseSource(self.clone())
    }

    pub fn output(&self) -> SimOutput {
        SimOutput(self.clone())
    }

    pub fn replan_service(&self, path_sender: Sender<Path>) -> SimReplan {
        SimReplan {
            world: self.clone(),
            path_sender,
        }
    }

    fn lock(&self) -> MutexGuard<SimState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

impl PoseSource for SimPoseSource {
    fn lookup_pose(&mut self, timeout: Duration) -> Result<Pose, LocError> {
        let mut state = self.0.lock();
        state.num_lookups += 1;

        match self.0.params.pose_dropout_period {
            Some(n) if n > 0 && state.num_lookups % n == 0 => Err(LocError::Timeout(timeout)),
            _ => Ok(state.pose),
        }
    }
}

impl NavOutput for SimOutput {
    fn publish_velocity(&mut self, cmd: VelocityCmd) {
        trace!("Velocity: {:?}", cmd);
        self.0.lock().velocity = cmd;
    }

    fn publish_local_goal(&mut self, goal: LocalGoal) {
        self.0.lock().local_goal = Some(goal);
    }
}

impl ReplanService for SimReplan {
    fn request_replan(&mut self) -> Result<(), ReplanError> {
        self.world.lock().num_replans += 1;

        let path = self
            .world
            .path_to_goal()
            .map_err(|e| ReplanError::NoPath(e.to_string()))?;

        debug!("Sim replan: {} point path to goal", path.get_num_points());

        self.path_sender
            .send(path)
            .map_err(|_| ReplanError::Unavailable("path receiver has been dropped".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Distance along the ray from `origin` in unit direction `dir` to the edge of the obstacle, if
/// the ray hits it. A ray starting inside the obstacle returns the exit distance.
fn ray_circle(origin: &Vector2<f64>, dir: &Vector2<f64>, obstacle: &CircleObstacle) -> Option<f64> {
    let to_origin = origin - Vector2::new(obstacle.centre_m[0], obstacle.centre_m[1]);

    let b = dir.dot(&to_origin);
    let c = to_origin.norm_squared() - obstacle.radius_m.powi(2);
    let disc = b * b - c;

    if disc < 0.0 {
        return None;
    }

    let sqrt_disc = disc.sqrt();
    let near = -b - sqrt_disc;
    let far = -b + sqrt_disc;

    if near >= 0.0 {
        Some(near)
    } else if far >= 0.0 {
        Some(far)
    } else {
        None
    }
}
