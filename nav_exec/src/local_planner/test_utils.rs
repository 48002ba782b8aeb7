//! Mock collaborators for testing the local planner.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use comms_if::nav::{LocalGoal, VelocityCmd};

use super::{NavOutput, ReplanError, ReplanService};
use crate::loc::{LocError, Pose, PoseSource};

/// Pose source returning whatever pose was last set, or failing if `None`.
#[derive(Clone)]
pub struct MockPose(Arc<Mutex<Option<Pose>>>);

/// Records everything published.
#[derive(Clone, Default)]
pub struct OutputLog {
    velocities: Arc<Mutex<Vec<VelocityCmd>>>,
    goals: Arc<Mutex<Vec<LocalGoal>>>,
}

/// Replan service counting calls, succeeding or failing as configured.
#[derive(Clone)]
pub struct MockReplan {
    num_calls: Arc<AtomicUsize>,
    succeed: bool,
}

impl MockPose {
    pub fn new(pose: Option<Pose>) -> Self {
        Self(Arc::new(Mutex::new(pose)))
    }

    pub fn set(&self, pose: Option<Pose>) {
        *self.0.lock().unwrap() = pose;
    }
}

impl PoseSource for MockPose {
    fn lookup_pose(&mut self, timeout: Duration) -> Result<Pose, LocError> {
        match *self.0.lock().unwrap() {
            Some(p) => Ok(p),
            None => Err(LocError::Timeout(timeout)),
        }
    }
}

impl OutputLog {
    pub fn velocities(&self) -> Vec<VelocityCmd> {
        self.velocities.lock().unwrap().clone()
    }

    pub fn goals(&self) -> Vec<LocalGoal> {
        self.goals.lock().unwrap().clone()
    }
}

impl NavOutput for OutputLog {
    fn publish_velocity(&mut self, cmd: VelocityCmd) {
        self.velocities.lock().unwrap().push(cmd);
    }

    fn publish_local_goal(&mut self, goal: LocalGoal) {
        self.goals.lock().unwrap().push(goal);
    }
}

impl MockReplan {
    pub fn new(succeed: bool) -> Self {
        Self {
            num_calls: Arc::new(AtomicUsize::new(0)),
            succeed,
        }
    }

    pub fn num_calls(&self) -> usize {
        self.num_calls.load(Ordering::SeqCst)
    }
}

impl ReplanService for MockReplan {
    fn request_replan(&mut self) -> Result<(), ReplanError> {
        self.num_calls.fetch_add(1, Ordering::SeqCst);

        if self.succeed {
            Ok(())
        } else {
            Err(ReplanError::Unavailable("mock planner is down".into()))
        }
    }
}
