//! # Local planner
//!
//! Runs the control loop which drives the vehicle along a reference path. Each installed path
//! starts a new episode on a background thread which ticks at a fixed period:
//!
//! 1. The pose is looked up and the path follower selects the local goal.
//! 2. If the vehicle is within the arrival tolerance of the end of the path the episode ends.
//! 3. The velocity search runs on a snapshot of the obstacle buffer and the result is blended with
//!    the previous command before being published.
//! 4. If the goal index hasn't advanced enough for too many ticks a new global path is requested
//!    and the episode ends.
//!
//! All control state is behind one lock (the control lock) which is held for a whole tick,
//! including any replan request. Scans are ingested under the obstacle buffer's own lock, so the
//! sensor side never waits on a tick.
//!
//! Installing a path while an episode is running cancels and joins that episode before starting
//! the new one, so there is at most one episode at a time.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod params;
mod state;

#[cfg(test)]
mod test_utils;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::scan::{LaserScan, ScanError},
    nav::{LocalGoal, VelocityCmd},
};
use log::{error, warn};
use util::session;

use crate::{
    dwa::{DwaError, DwaParams, VelocitySearch},
    follow::PathFollower,
    loc::{Pose, PoseSource, PoseTracker},
    obstacles::ObstacleBuffer,
    path::Path,
};

use self::state::{Controller, TickOutcome};

pub use self::{
    params::LocalPlannerParams,
    state::{EpisodeReport, EpisodeState, PlannerStatus},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Sink for everything the control loop produces.
pub trait NavOutput: Send {
    /// Send a velocity command to the drive system.
    fn publish_velocity(&mut self, cmd: VelocityCmd);

    /// Publish the current local goal.
    fn publish_local_goal(&mut self, goal: LocalGoal);

    /// Publish the predicted trajectory of the last command, in the Robot Body frame.
    fn publish_trajectory(&mut self, _trajectory: &[Pose]) {}
}

/// The global planner, as seen by the local planner.
pub trait ReplanService: Send {
    /// Request a new global path from the current pose.
    ///
    /// This is called with the control lock held, so implementations must bound their own
    /// latency. The new path is delivered through [`LocalPlanner::install_path`] and must not be
    /// installed from within this call.
    fn request_replan(&mut self) -> Result<(), ReplanError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The local planner.
pub struct LocalPlanner {
    shared: Arc<Shared>,

    episode: Option<Episode>,
    next_episode_id: u64,
}

/// State shared with the episode threads.
struct Shared {
    params: LocalPlannerParams,
    search: VelocitySearch,

    /// Lookahead threshold, shared by the follower and the obstacle buffer
    threshold_m: f64,

    obstacles: Arc<ObstacleBuffer>,
    control: Mutex<Controller>,

    /// True while an episode is tracking
    running: AtomicBool,
}

/// Handle on a running episode thread.
struct Episode {
    id: u64,
    cancel: Arc<AtomicBool>,
    jh: JoinHandle<Option<EpisodeReport>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReplanError {
    #[error("Global planner is unavailable: {0}")]
    Unavailable(String),

    #[error("Global planner could not find a path: {0}")]
    NoPath(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LocalPlannerError {
    #[error("Invalid local planner parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid velocity search parameters: {0}")]
    DwaError(#[from] DwaError),

    #[error("Could not spawn the episode thread: {0}")]
    ThreadSpawnError(std::io::Error),

    #[error("Episode {0} thread panicked")]
    EpisodePanicked(u64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LocalPlanner {
    /// Create a new planner. No episode runs until a path is installed.
    pub fn new(
        params: LocalPlannerParams,
        dwa_params: DwaParams,
        pose_source: Box<dyn PoseSource>,
        output: Box<dyn NavOutput>,
        replan: Box<dyn ReplanService>,
    ) -> Result<Self, LocalPlannerError> {
        params.validate()?;

        if !periods_match(params.tick_period_s, dwa_params.dt_s) {
            warn!(
                "Tick period ({} s) differs from the DWA timestep ({} s), the dynamic window won't \
                match what the vehicle can reach in one tick",
                params.tick_period_s, dwa_params.dt_s
            );
        }

        let threshold_m = dwa_params.lookahead_threshold_m();
        let search = VelocitySearch::new(dwa_params)?;

        let tracker = PoseTracker::new(
            pose_source,
            Duration::from_secs_f64(params.pose_timeout_s),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                params,
                search,
                threshold_m,
                obstacles: Arc::new(ObstacleBuffer::new(threshold_m)),
                control: Mutex::new(Controller::new(tracker, output, replan)),
                running: AtomicBool::new(false),
            }),
            episode: None,
            next_episode_id: 0,
        })
    }

    /// The obstacle buffer, which can be handed to the sensor side to ingest scans directly.
    pub fn obstacle_buffer(&self) -> Arc<ObstacleBuffer> {
        self.shared.obstacles.clone()
    }

    pub fn ingest_scan(&self, scan: &LaserScan) -> Result<(), ScanError> {
        self.shared.obstacles.ingest_scan(scan)
    }

    pub fn ingest(&self, ranges_m: &[f64], angle_min_rad: f64, angle_increment_rad: f64) {
        self.shared
            .obstacles
            .ingest(ranges_m, angle_min_rad, angle_increment_rad)
    }

    /// Install a new reference path, starting a new episode.
    ///
    /// Any running episode is cancelled and joined first, its report is returned.
    pub fn install_path(&mut self, path: Path) -> Result<Option<EpisodeReport>, LocalPlannerError> {
        let previous = self.stop_episode()?;

        let id = self.next_episode_id;
        self.next_episode_id += 1;

        self.shared
            .lock_control()
            .begin_episode(id, PathFollower::new(path, self.shared.threshold_m));
        self.shared.running.store(true, Ordering::SeqCst);

        let cancel = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let thread_cancel = cancel.clone();

        let jh = thread::Builder::new()
            .name(format!("episode_{}", id))
            .spawn(move || episode_thread(shared, thread_cancel))
            .map_err(|e| {
                self.shared.lock_control().finish(EpisodeState::Aborted);
                self.shared.running.store(false, Ordering::SeqCst);
                LocalPlannerError::ThreadSpawnError(e)
            })?;

        self.episode = Some(Episode { id, cancel, jh });

        Ok(previous)
    }

    /// Stop the running episode, if any, returning its report.
    ///
    /// The velocity is left as it was, call this before installing a path from somewhere else.
    pub fn cancel(&mut self) -> Result<Option<EpisodeReport>, LocalPlannerError> {
        self.stop_episode()
    }

    /// Block until the running episode ends by itself, returning its report.
    pub fn wait_episode(&mut self) -> Result<Option<EpisodeReport>, LocalPlannerError> {
        match self.episode.take() {
            Some(ep) => self.join_episode(ep),
            None => Ok(None),
        }
    }

    /// True while an episode is tracking a path.
    pub fn is_tracking(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Get a snapshot of the planner's state.
    ///
    /// Blocks for up to one tick (plus any replan request in progress).
    pub fn status(&self) -> PlannerStatus {
        self.shared.lock_control().status()
    }

    fn stop_episode(&mut self) -> Result<Option<EpisodeReport>, LocalPlannerError> {
        match self.episode.take() {
            Some(ep) => {
                ep.cancel.store(true, Ordering::SeqCst);
                self.join_episode(ep)
            }
            None => Ok(None),
        }
    }

    fn join_episode(&self, ep: Episode) -> Result<Option<EpisodeReport>, LocalPlannerError> {
        match ep.jh.join() {
            Ok(report) => Ok(report),
            Err(_) => {
                error!("Episode {} thread panicked", ep.id);
                self.shared.running.store(false, Ordering::SeqCst);
                Err(LocalPlannerError::EpisodePanicked(ep.id))
            }
        }
    }
}

impl Drop for LocalPlanner {
    fn drop(&mut self) {
        if let Err(e) = self.stop_episode() {
            warn!("Error stopping the local planner: {}", e);
        }
    }
}

impl Shared {
    /// Lock the control state. A panic on another thread mid-tick leaves the state consistent
    /// enough to stop the vehicle, so poisoning is ignored.
    fn lock_control(&self) -> MutexGuard<Controller> {
        match self.control.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Body of an episode thread. Ticks until the episode ends or is cancelled.
fn episode_thread(shared: Arc<Shared>, cancel: Arc<AtomicBool>) -> Option<EpisodeReport> {
    let tick_period = Duration::from_secs_f64(shared.params.tick_period_s);

    let report = loop {
        let tick_start = Instant::now();

        {
            let mut ctrl = shared.lock_control();

            if cancel.load(Ordering::SeqCst) {
                let report = ctrl.finish(EpisodeState::Preempted);
                shared.running.store(false, Ordering::SeqCst);
                break report;
            }

            if let TickOutcome::Finished(end_state) =
                ctrl.tick(&shared.params, &shared.search, &shared.obstacles)
            {
                let report = ctrl.finish(end_state);
                shared.running.store(false, Ordering::SeqCst);
                break report;
            }
        }

        // ---- PACING ----

        let tick_dur = tick_start.elapsed();

        match tick_period.checked_sub(tick_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Tick overran by {:.06} s",
                tick_dur.as_secs_f64() - tick_period.as_secs_f64()
            ),
        }
    };

    if let Some(ref r) = report {
        session::save_with_timestamp("episodes/episode.json", r.clone());
    }

    report
}

/// True if the tick period and the search timestep are the same to within a microsecond.
fn periods_match(tick_period_s: f64, dt_s: f64) -> bool {
    (tick_period_s - dt_s).abs() < 1e-6
}

#[cfg(test)]
mod test {
    use nalgebra::Vector2;

    use super::test_utils::*;
    use super::*;
    use crate::dwa::params::test_params as dwa_test_params;

    struct Fixture {
        planner: LocalPlanner,
        pose: MockPose,
        log: OutputLog,
        replans: MockReplan,
    }

    fn fixture(start: Pose, replan_succeeds: bool, params: LocalPlannerParams) -> Fixture {
        let pose = MockPose::new(Some(start));
        let log = OutputLog::default();
        let replans = MockReplan::new(replan_succeeds);

        let planner = LocalPlanner::new(
            params,
            dwa_test_params(),
            Box::new(pose.clone()),
            Box::new(log.clone()),
            Box::new(replans.clone()),
        )
        .unwrap();

        Fixture {
            planner,
            pose,
            log,
            replans,
        }
    }

    fn long_path() -> Path {
        Path::new((0..=20).map(|i| Vector2::new(i as f64, 0.0)).collect()).unwrap()
    }

    fn point_path(x: f64, y: f64) -> Path {
        Path::new(vec![Vector2::new(x, y)]).unwrap()
    }

    #[test]
    fn test_invalid_params() {
        let mut params = params::test_params();
        params.blend_alpha = 2.0;

        let result = LocalPlanner::new(
            params,
            dwa_test_params(),
            Box::new(MockPose::new(None)),
            Box::new(OutputLog::default()),
            Box::new(MockReplan::new(true)),
        );
        assert!(matches!(result, Err(LocalPlannerError::InvalidParams(_))));

        let mut dwa_params = dwa_test_params();
        dwa_params.dt_s = 0.0;

        let result = LocalPlanner::new(
            params::test_params(),
            dwa_params,
            Box::new(MockPose::new(None)),
            Box::new(OutputLog::default()),
            Box::new(MockReplan::new(true)),
        );
        assert!(matches!(result, Err(LocalPlannerError::DwaError(_))));
    }

    #[test]
    fn test_periods_match() {
        assert!(periods_match(0.1, 0.1));
        assert!(!periods_match(0.001, 0.1));

        // The shipped parameters tick at the DWA timestep
        let root = concat!(env!("CARGO_MANIFEST_DIR"), "/../params/");
        let params: LocalPlannerParams =
            util::params::load_path(format!("{}local_planner.toml", root)).unwrap();
        let dwa_params: DwaParams = util::params::load_path(format!("{}dwa.toml", root)).unwrap();
        assert!(periods_match(params.tick_period_s, dwa_params.dt_s));
    }

    #[test]
    fn test_arrive_at_single_waypoint() {
        let mut f = fixture(Pose::new(1.0, 1.0, 0.0), true, params::test_params());
        assert_eq!(f.planner.status().state, EpisodeState::Idle);

        assert!(f.planner.install_path(point_path(1.0, 1.0)).unwrap().is_none());
        let report = f.planner.wait_episode().unwrap().unwrap();

        assert_eq!(report.end_state, EpisodeState::Arrived);
        assert_eq!(report.num_ticks, 1);
        assert_eq!(report.final_goal_index, 0);
        assert_eq!(f.log.goals()[0].index, 0);
        assert_eq!(f.log.velocities(), vec![VelocityCmd::zero()]);
        assert_eq!(f.replans.num_calls(), 0);
        assert!(!f.planner.is_tracking());
        assert_eq!(f.planner.status().state, EpisodeState::Arrived);
    }

    #[test]
    fn test_arrives_once() {
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params::test_params());

        f.planner.install_path(point_path(0.1, 0.0)).unwrap();
        f.planner.wait_episode().unwrap();
        let num_published = f.log.velocities().len();

        // Nothing more is published once the episode has ended
        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.log.velocities().len(), num_published);
        assert!(f.planner.wait_episode().unwrap().is_none());
    }

    #[test]
    fn test_stagnation_replans_once() {
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params::test_params());

        f.planner.install_path(long_path()).unwrap();
        let report = f.planner.wait_episode().unwrap().unwrap();

        assert_eq!(report.end_state, EpisodeState::Stagnated);
        assert_eq!(report.num_ticks, params::test_params().stagnation_limit + 1);
        assert_eq!(f.replans.num_calls(), 1);

        // The last command is kept and re-published
        let status = f.planner.status();
        assert_eq!(status.state, EpisodeState::Stagnated);
        assert!(!status.velocity.is_zero());
        assert_eq!(f.log.velocities().last(), Some(&status.velocity));
        assert_eq!(report.final_velocity, status.velocity);
    }

    #[test]
    fn test_replan_failure_aborts() {
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), false, params::test_params());

        f.planner.install_path(long_path()).unwrap();
        let report = f.planner.wait_episode().unwrap().unwrap();

        assert_eq!(report.end_state, EpisodeState::Aborted);
        assert_eq!(f.replans.num_calls(), 1);
        assert_eq!(f.log.velocities().last(), Some(&VelocityCmd::zero()));
        assert!(f.planner.status().velocity.is_zero());

        // A later install still works
        f.pose.set(Some(Pose::new(5.0, 5.0, 0.0)));
        f.planner.install_path(point_path(5.0, 5.0)).unwrap();
        let report = f.planner.wait_episode().unwrap().unwrap();
        assert_eq!(report.end_state, EpisodeState::Arrived);
        assert_eq!(report.episode_id, 1);
    }

    #[test]
    fn test_install_preempts() {
        let mut params = params::test_params();
        params.stagnation_limit = 1_000_000;
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params);

        f.planner.install_path(long_path()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(f.planner.is_tracking());
        assert_eq!(f.planner.status().goal_index, Some(3));

        let previous = f.planner.install_path(point_path(0.0, 0.0)).unwrap().unwrap();
        assert_eq!(previous.episode_id, 0);
        assert_eq!(previous.end_state, EpisodeState::Preempted);
        assert!(!previous.final_velocity.is_zero());

        let report = f.planner.wait_episode().unwrap().unwrap();
        assert_eq!(report.episode_id, 1);
        assert_eq!(report.end_state, EpisodeState::Arrived);
        assert_eq!(f.replans.num_calls(), 0);
    }

    #[test]
    fn test_cancel() {
        let mut params = params::test_params();
        params.stagnation_limit = 1_000_000;
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params);

        assert!(f.planner.cancel().unwrap().is_none());

        f.planner.install_path(long_path()).unwrap();
        thread::sleep(Duration::from_millis(10));

        let report = f.planner.cancel().unwrap().unwrap();
        assert_eq!(report.end_state, EpisodeState::Preempted);
        assert!(!f.planner.is_tracking());
        assert_eq!(f.planner.status().state, EpisodeState::Preempted);
    }

    #[test]
    fn test_goal_index_monotonic() {
        let mut params = params::test_params();
        params.stagnation_limit = 1_000_000;
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params);

        f.planner.install_path(long_path()).unwrap();

        let poses = [4.0, 1.0, 8.0, 0.0, 2.0, 12.0, 3.0];
        for x in poses.iter() {
            f.pose.set(Some(Pose::new(*x, 0.3, 0.0)));
            thread::sleep(Duration::from_millis(5));
        }

        f.planner.cancel().unwrap();

        let goals = f.log.goals();
        assert!(!goals.is_empty());
        assert!(goals.windows(2).all(|w| w[0].index <= w[1].index));
        assert!(goals.iter().all(|g| g.index <= 20));
    }

    #[test]
    fn test_concurrent_ingest() {
        let mut params = params::test_params();
        params.stagnation_limit = 200;
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params);

        let buffer = f.planner.obstacle_buffer();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();

        let ingest_jh = thread::spawn(move || {
            let mut i = 0;
            while !stop_clone.load(Ordering::SeqCst) {
                let range = 1.0 + (i % 10) as f64 * 0.1;
                buffer.ingest(&vec![range; 90], -0.8, 0.02);
                i += 1;
            }
        });

        f.planner.install_path(long_path()).unwrap();
        let report = f.planner.wait_episode().unwrap().unwrap();

        stop.store(true, Ordering::SeqCst);
        ingest_jh.join().unwrap();

        assert!(report.end_state.is_final());
        assert_eq!(f.planner.obstacle_buffer().threshold_m(), 3.0);
    }

    #[test]
    fn test_no_pose_stays_still() {
        let mut params = params::test_params();
        params.stagnation_limit = 5;
        let mut f = fixture(Pose::new(0.0, 0.0, 0.0), true, params);
        f.pose.set(None);

        f.planner.install_path(long_path()).unwrap();
        let report = f.planner.wait_episode().unwrap().unwrap();

        assert_eq!(report.end_state, EpisodeState::Stagnated);
        assert_eq!(report.num_pose_dropouts, report.num_ticks);
        assert!(f.log.velocities().iter().all(|v| v.is_zero()));
        assert!(f.log.goals().is_empty());
    }
}
