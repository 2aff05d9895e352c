//! Host platform (linux for example) utility functions

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable giving the root directory of the software.
pub const SW_ROOT_ENV_VAR: &str = "WEEDBOT_SW_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the root directory of the software, which contains the `params` directory and where
/// sessions are created.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Resolve a path from a parameter file against the software root.
///
/// Absolute paths are returned unchanged.
pub fn resolve_path<P: Into<PathBuf>>(root: &Path, path: P) -> PathBuf {
    let path = path.into();
    if path.is_absolute() {
        path
    }
    else {
        root.join(path)
    }
}
