//! # Local navigation library.
//!
//! This library implements the local planning layer of the vehicle: it follows a reference path
//! produced by a global planner, avoids obstacles seen by the laser scanner using a dynamic window
//! search, and asks the global planner for a new path when progress along the current one stalls.
//!
//! The library is used by the `nav_exec` simulation executable and can be embedded by any other
//! executable that provides the external collaborators (pose source, replan service and an output
//! for the velocity demands).

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Localisation interface - tracks the latest pose of the vehicle from an external source
pub mod loc;

/// Defines the reference path type
pub mod path;

/// Path following - selects the local goal along the reference path
pub mod follow;

/// Obstacle buffer - converts laser scans into robot-frame obstacle points
pub mod obstacles;

/// Dynamic window approach - finds the best collision free velocity
pub mod dwa;

/// Local planner - the control loop tying everything together
pub mod local_planner;

/// Simulated collaborators used by the executable
pub mod sim;
