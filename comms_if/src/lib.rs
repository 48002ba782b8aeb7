//! # Communications interface crate.
//!
//! Provides the message structures exchanged between the local planner and its external
//! collaborators (sensors, the global planner and the drive system). No transport is defined
//! here, only the serialisable data.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Data produced by equipment (like the laser scanner)
pub mod eqpt;

/// Navigation outputs (velocity demands and local goals)
pub mod nav;
