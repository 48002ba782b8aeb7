//! # Local navigation simulation
//!
//! Runs the local planner against a simulated vehicle, laser and global planner. The vehicle is
//! given a direct path to the goal, and obstacles on the way must be avoided by the local
//! planner. When the planner stalls the simulated global planner hands back a fresh direct path
//! from wherever the vehicle has got to.
//!
//! The main loop:
//!     - Integrates the simulated vehicle over one cycle
//!     - Feeds a simulated scan to the planner
//!     - Installs any path produced by a replan
//!     - Exits on arrival, abort or timeout

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::mpsc::channel,
    thread,
    time::{Duration, Instant},
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{debug, error, info, warn};
use structopt::StructOpt;

use nav_lib::{
    dwa::DwaParams,
    local_planner::{EpisodeState, LocalPlanner, LocalPlannerParams},
    sim::{SimParams, SimWorld},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Target period of one cycle.
const CYCLE_PERIOD_S: f64 = 0.10;

/// Number of cycles between status prints
const STATUS_PERIOD_CYCLES: u64 = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "nav_exec", about = "Run the local planner in simulation")]
struct Opts {
    /// Override the goal X position from the simulation parameters
    #[structopt(long, allow_hyphen_values = true)]
    goal_x: Option<f64>,

    /// Override the goal Y position from the simulation parameters
    #[structopt(long, allow_hyphen_values = true)]
    goal_y: Option<f64>,

    /// Maximum simulated run time in seconds
    #[structopt(short, long, default_value = "120")]
    timeout_s: f64,

    /// Simulation parameter file, relative to the params directory
    #[structopt(long, default_value = "sim.toml")]
    sim_params: String,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("nav_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Local Navigation Simulation\n");
    info!("Running on: {}", host::get_host_info());
    info!("Session directory: {:?}\n", session.session_root);
    debug!("Options: {:?}", opts);

    // ---- LOAD PARAMETERS ----

    let dwa_params: DwaParams =
        util::params::load("dwa.toml").wrap_err("Could not load DWA params")?;
    let local_planner_params: LocalPlannerParams = util::params::load("local_planner.toml")
        .wrap_err("Could not load local planner params")?;
    let mut sim_params: SimParams =
        util::params::load(&opts.sim_params).wrap_err("Could not load sim params")?;

    if let Some(x) = opts.goal_x {
        sim_params.goal_m[0] = x;
    }
    if let Some(y) = opts.goal_y {
        sim_params.goal_m[1] = y;
    }

    info!("Parameters loaded");

    // ---- MODULE INIT ----

    let world = SimWorld::new(sim_params).wrap_err("Invalid sim params")?;
    let (path_sender, path_receiver) = channel();

    let mut planner = LocalPlanner::new(
        local_planner_params,
        dwa_params,
        Box::new(world.pose_source()),
        Box::new(world.output()),
        Box::new(world.replan_service(path_sender)),
    )
    .wrap_err("Failed to initialise the local planner")?;

    debug!(
        "Keeping scan returns closer than {:.02} m",
        planner.obstacle_buffer().threshold_m()
    );

    info!(
        "Driving from ({:.02}, {:.02}) to {:?} past {} obstacles",
        world.pose().position_m.x,
        world.pose().position_m.y,
        world.params().goal_m,
        world.params().obstacles.len()
    );

    let initial_path = world
        .path_to_goal()
        .wrap_err("Could not build the initial path")?;
    planner
        .install_path(initial_path)
        .wrap_err("Could not install the initial path")?;

    // ---- MAIN LOOP ----

    let start_instant = Instant::now();
    let mut num_cycles: u64 = 0;

    let end_state = loop {
        let cycle_start_instant = Instant::now();

        // ---- SIMULATION ----

        world.step(CYCLE_PERIOD_S);

        if let Err(e) = planner.ingest_scan(&world.scan()) {
            warn!("Could not ingest scan: {}", e);
        }

        if world.min_clearance_m() < 0.0 {
            warn!("Vehicle is inside an obstacle at {:?}", world.pose());
        }

        // ---- NEW PATHS ----

        while let Ok(path) = path_receiver.try_recv() {
            info!("Installing replanned path of {} points", path.get_num_points());
            if let Some(report) = planner
                .install_path(path)
                .wrap_err("Could not install replanned path")?
            {
                debug!("Previous episode: {:?}", report);
            }
        }

        // ---- STATUS ----

        let status = planner.status();

        if num_cycles % STATUS_PERIOD_CYCLES == 0 {
            let local_goal = match world.local_goal() {
                Some(g) => format!(
                    "{} at ({:.02}, {:.02})",
                    g.index, g.position_m_world[0], g.position_m_world[1]
                ),
                None => String::from("none"),
            };

            info!(
                "[{:.01} s] pos ({:.02}, {:.02}), local goal {}, cmd ({:.03} m/s, {:.03} rad/s)",
                start_instant.elapsed().as_secs_f64(),
                world.pose().position_m.x,
                world.pose().position_m.y,
                local_goal,
                status.velocity.linear_ms,
                status.velocity.angular_rads
            );
        }

        // A stagnated episode has already sent its new path, it'll be installed next cycle
        if !planner.is_tracking() {
            match status.state {
                EpisodeState::Arrived | EpisodeState::Aborted => break Some(status.state),
                _ => (),
            }
        }

        if start_instant.elapsed().as_secs_f64() > opts.timeout_s {
            warn!("Timed out after {:.01} s", opts.timeout_s);
            break None;
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match Duration::from_secs_f64(CYCLE_PERIOD_S).checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - CYCLE_PERIOD_S
            ),
        }

        num_cycles += 1;
    };

    // ---- SHUTDOWN ----

    if let Some(report) = planner.cancel().wrap_err("Failed to stop the local planner")? {
        info!("Final episode: {:?}", report);
    }

    session.save("final_pose.json", world.pose());

    let result = match end_state {
        Some(EpisodeState::Arrived) => {
            info!(
                "Arrived at ({:.02}, {:.02}) after {} replans",
                world.pose().position_m.x,
                world.pose().position_m.y,
                world.num_replans()
            );
            Ok(())
        }
        Some(s) => {
            error!("Navigation ended in state {:?}", s);
            Err(eyre!("Navigation failed"))
        }
        None => Err(eyre!("Navigation timed out")),
    };

    info!("End of execution");
    session.exit();

    result
}
