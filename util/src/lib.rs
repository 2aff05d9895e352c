//! Utility library for the weeding robot software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod archive;
pub mod fs;
pub mod host;
pub mod logger;
pub mod params;
pub mod session;
pub mod time;
