//! Host platform utility functions

use std::{env, path::PathBuf};

/// Name of the environment variable pointing at the root of the software checkout.
pub const SW_ROOT_ENV_VAR: &str = "LOCAL_NAV_SW_ROOT";

/// Get the root directory of the software, as given by the `LOCAL_NAV_SW_ROOT` environment
/// variable.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Get a short description of the host the software is running on.
pub fn get_host_info() -> String {
    format!(
        "{} ({}), {} cpus",
        env::consts::OS,
        env::consts::ARCH,
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    )
}
