//! Logger setup
//!
//! Records go to both stdout and the session log file. Each record is stamped with the number of
//! seconds since the session started, debug and trace records also carry their target and the
//! name of the emitting thread, since the control loop runs on its own episode threads.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt;

use colored::{ColoredString, Colorize};
use log::{info, Level, Record};
use thiserror::Error;

use crate::session::{self, Session};

pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Targets which are capped at debug level, their trace output is per-candidate and swamps
/// everything else.
const NOISY_TARGETS: [&str; 1] = ["nav_lib::dwa"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must be at least `Info` so that episode start and end messages always make it into
/// the log. Only the stdout output is coloured.
///
/// This must only be called once per process.
pub fn logger_init(min_level: LevelFilter, session: &Session) -> Result<(), LoggerInitError> {
    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file =
        fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFileInitError)?;

    let stdout = fern::Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, true))
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, false))
        .chain(log_file);

    let mut dispatch = fern::Dispatch::new().level(min_level);
    for target in NOISY_TARGETS.iter() {
        dispatch = dispatch.level_for(*target, min_level.min(LevelFilter::Debug));
    }

    dispatch
        .chain(stdout)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn format_record(
    out: fern::FormatCallback,
    message: &fmt::Arguments,
    record: &Record,
    colour: bool,
) {
    let level = match colour {
        true => level_to_str(record.level()),
        false => level_to_str(record.level()).clear(),
    };

    if record.level() > Level::Info {
        out.finish(format_args!(
            "[{:10.6} {}] {} ({}): {}",
            session::get_elapsed_seconds(),
            level,
            record.target(),
            std::thread::current().name().unwrap_or("?"),
            message
        ))
    } else {
        out.finish(format_args!(
            "[{:10.6} {}] {}",
            session::get_elapsed_seconds(),
            level,
            message
        ))
    }
}

/// Get the string representation of a log level
fn level_to_str(level: Level) -> ColoredString {
    match level {
        Level::Trace => "TRC".dimmed().italic(),
        Level::Debug => "DBG".dimmed(),
        Level::Info => "INF".normal(),
        Level::Warn => "WRN".yellow(),
        Level::Error => "ERR".red().bold(),
    }
}
