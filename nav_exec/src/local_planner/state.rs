//! Control state of the local planner, everything guarded by the control lock.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use comms_if::nav::VelocityCmd;
use log::{debug, error, info, warn};
use serde::Serialize;
use util::maths::blend;

use crate::{
    dwa::{SearchStatus, VelocitySearch},
    follow::PathFollower,
    loc::PoseTracker,
    obstacles::ObstacleBuffer,
};

use super::{LocalPlannerParams, NavOutput, ReplanService};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the control loop owns. Only ever accessed with the control lock held.
pub(super) struct Controller {
    tracker: PoseTracker,
    output: Box<dyn NavOutput>,
    replan: Box<dyn ReplanService>,

    /// The last commanded velocity, persists between episodes
    velocity: VelocityCmd,

    /// Set once the velocity has been zeroed before the first episode
    velocity_initialised: bool,

    state: EpisodeState,
    episode: Option<EpisodeData>,
}

/// Data for the running episode
struct EpisodeData {
    id: u64,
    follower: PathFollower,
    start_instant: Instant,

    /// Goal index at the last stagnation reset
    goal_index_last: usize,
    stagnation_count: u64,

    num_ticks: u64,
    num_infeasible_ticks: u64,
    num_pose_dropouts: u64,
    replan_duration_s: Option<f64>,
}

/// Summary of a finished episode, saved into the session.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub episode_id: u64,
    pub end_state: EpisodeState,
    pub num_ticks: u64,
    pub final_goal_index: usize,
    pub path_num_points: usize,
    pub path_length_m: f64,
    pub duration_s: f64,

    /// Ticks on which no feasible velocity was found
    pub num_infeasible_ticks: u64,

    /// Ticks on which no pose at all was available
    pub num_pose_dropouts: u64,

    /// Time taken by the replan request, if one was made
    pub replan_duration_s: Option<f64>,

    /// Velocity state when the episode ended
    pub final_velocity: VelocityCmd,
}

/// Snapshot of the planner's state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlannerStatus {
    pub state: EpisodeState,
    pub episode_id: Option<u64>,
    pub goal_index: Option<usize>,
    pub stagnation_count: u64,
    pub velocity: VelocityCmd,
    pub pose_stale: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EpisodeState {
    /// No path has been installed yet
    Idle,

    /// Following a path
    Tracking,

    /// Reached the end of the path
    Arrived,

    /// Progress stalled and a new global path was requested
    Stagnated,

    /// Progress stalled and the replan request failed
    Aborted,

    /// Stopped by a new path or a cancel request
    Preempted,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TickOutcome {
    Continue,
    Finished(EpisodeState),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EpisodeState {
    /// True for the states an episode ends in.
    pub fn is_final(&self) -> bool {
        !matches!(self, EpisodeState::Idle | EpisodeState::Tracking)
    }
}

impl Controller {
    pub fn new(
        tracker: PoseTracker,
        output: Box<dyn NavOutput>,
        replan: Box<dyn ReplanService>,
    ) -> Self {
        Self {
            tracker,
            output,
            replan,
            velocity: VelocityCmd::zero(),
            velocity_initialised: false,
            state: EpisodeState::Idle,
            episode: None,
        }
    }

    /// Reset the tracking state for a new path.
    pub fn begin_episode(&mut self, id: u64, follower: PathFollower) {
        // The velocity is only cleared before the very first episode, later episodes search from
        // the current command so switching paths is smooth.
        if !self.velocity_initialised {
            self.velocity = VelocityCmd::zero();
            self.velocity_initialised = true;
        }

        info!(
            "Starting episode {} on a path of {} points ({:.02} m)",
            id,
            follower.path().get_num_points(),
            follower.path().get_length()
        );

        self.episode = Some(EpisodeData {
            id,
            follower,
            start_instant: Instant::now(),
            goal_index_last: 0,
            stagnation_count: 0,
            num_ticks: 0,
            num_infeasible_ticks: 0,
            num_pose_dropouts: 0,
            replan_duration_s: None,
        });
        self.state = EpisodeState::Tracking;
    }

    /// Run one tick of the control loop.
    pub fn tick(
        &mut self,
        params: &LocalPlannerParams,
        search: &VelocitySearch,
        obstacles: &ObstacleBuffer,
    ) -> TickOutcome {
        let ep = match self.episode.as_mut() {
            Some(e) => e,
            None => return TickOutcome::Finished(self.state),
        };

        ep.num_ticks += 1;
        ep.stagnation_count += 1;

        match self.tracker.current_pose() {
            Some(pose) => {
                let follow = ep.follower.step(&pose);
                self.output.publish_local_goal(follow.local_goal_msg());

                if follow.remaining_m < params.arrive_tolerance_m {
                    return TickOutcome::Finished(EpisodeState::Arrived);
                }

                let snapshot = obstacles.snapshot();
                let result = search.search(&self.velocity, &follow.local_goal_m, &snapshot);

                match result.status {
                    SearchStatus::Feasible => {
                        self.velocity = VelocityCmd {
                            linear_ms: blend(
                                result.velocity.linear_ms,
                                self.velocity.linear_ms,
                                params.blend_alpha,
                            ),
                            angular_rads: blend(
                                result.velocity.angular_rads,
                                self.velocity.angular_rads,
                                params.blend_alpha,
                            ),
                        };
                    }
                    SearchStatus::NoFeasibleVelocity => {
                        // Stop outright, blending would keep the vehicle moving into the obstacle
                        warn!(
                            "No feasible velocity among {} candidates, stopping",
                            result.num_candidates
                        );
                        ep.num_infeasible_ticks += 1;
                        self.velocity = VelocityCmd::zero();
                    }
                }

                self.output.publish_velocity(self.velocity);
                self.output.publish_trajectory(&result.trajectory);
            }
            None => {
                debug!("No pose available yet, holding still");
                ep.num_pose_dropouts += 1;
                self.velocity = VelocityCmd::zero();
                self.output.publish_velocity(self.velocity);
            }
        }

        // ---- STAGNATION ----

        let goal_index = ep.follower.goal_index();
        if goal_index - ep.goal_index_last > params.progress_delta {
            ep.stagnation_count = 0;
            ep.goal_index_last = goal_index;
        }

        if ep.stagnation_count > params.stagnation_limit {
            warn!(
                "No progress past goal index {} in {} ticks, requesting a new path",
                ep.goal_index_last, ep.stagnation_count
            );

            let replan_start = Instant::now();
            let replan_result = self.replan.request_replan();
            let replan_duration_s = replan_start.elapsed().as_secs_f64();
            ep.replan_duration_s = Some(replan_duration_s);

            return match replan_result {
                Ok(()) => {
                    info!("Replan requested in {:.03} s", replan_duration_s);
                    TickOutcome::Finished(EpisodeState::Stagnated)
                }
                Err(e) => {
                    error!("Replan request failed after {:.03} s: {}", replan_duration_s, e);
                    TickOutcome::Finished(EpisodeState::Aborted)
                }
            };
        }

        TickOutcome::Continue
    }

    /// End the running episode in the given state, publishing the final command for that state.
    pub fn finish(&mut self, end_state: EpisodeState) -> Option<EpisodeReport> {
        let ep = self.episode.take()?;

        match end_state {
            EpisodeState::Arrived | EpisodeState::Aborted => {
                self.velocity = VelocityCmd::zero();
                self.output.publish_velocity(self.velocity);
            }
            EpisodeState::Stagnated => self.output.publish_velocity(self.velocity),
            _ => (),
        }

        self.state = end_state;

        let report = EpisodeReport {
            episode_id: ep.id,
            end_state,
            num_ticks: ep.num_ticks,
            final_goal_index: ep.follower.goal_index(),
            path_num_points: ep.follower.path().get_num_points(),
            path_length_m: ep.follower.path().get_length(),
            duration_s: ep.start_instant.elapsed().as_secs_f64(),
            num_infeasible_ticks: ep.num_infeasible_ticks,
            num_pose_dropouts: ep.num_pose_dropouts,
            replan_duration_s: ep.replan_duration_s,
            final_velocity: self.velocity,
        };

        info!(
            "Episode {} ended {:?} after {} ticks at goal index {}",
            report.episode_id, report.end_state, report.num_ticks, report.final_goal_index
        );

        Some(report)
    }

    pub fn status(&self) -> PlannerStatus {
        PlannerStatus {
            state: self.state,
            episode_id: self.episode.as_ref().map(|e| e.id),
            goal_index: self.episode.as_ref().map(|e| e.follower.goal_index()),
            stagnation_count: self.episode.as_ref().map_or(0, |e| e.stagnation_count),
            velocity: self.velocity,
            pose_stale: self.tracker.is_stale(),
        }
    }
}
