//! # Telecommand module
//!
//! This module provides the operator commands which arrive at the coordinator over the UDP
//! control plane. All commands are plain ASCII text, no response is ever sent back.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Joystick commands
pub mod joystick;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// Internal
pub use joystick::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Operating mode of the robot.
///
/// There is exactly one authoritative mode at any time, owned by the coordinator.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Automatic weeding, detections are requested by the microcontroller
    Auto,

    /// Manual driving with the operator's joystick
    Manual,

    /// Intrinsic (lens distortion) calibration
    Distortion,

    /// Extrinsic (camera pose) estimation
    Extrinsik,
}

/// Possible parsing errors.
#[derive(Debug, Error, PartialEq)]
pub enum ModeParseError {
    #[error("\"{0}\" is not a recognised mode")]
    UnknownMode(String)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Mode {
    /// All modes in the order they are presented to the operator.
    pub const ALL: [Mode; 4] = [Mode::Auto, Mode::Manual, Mode::Distortion, Mode::Extrinsik];

    /// The upper-case wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "AUTO",
            Mode::Manual => "MANUAL",
            Mode::Distortion => "DISTORTION",
            Mode::Extrinsik => "EXTRINSIK",
        }
    }

    /// Parse a mode token as recieved from the operator.
    ///
    /// Surrounding whitespace is ignored and the token is upper-cased first, so `" auto\n"` is
    /// accepted.
    pub fn from_token(token: &str) -> Result<Self, ModeParseError> {
        let normalised = token.trim().to_uppercase();

        Mode::ALL
            .iter()
            .find(|m| m.as_str() == normalised)
            .copied()
            .ok_or(ModeParseError::UnknownMode(normalised))
    }

    /// True for the two modes which drive a camera calibration workflow.
    pub fn is_calibration(&self) -> bool {
        matches!(self, Mode::Distortion | Mode::Extrinsik)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Auto
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::from_token(s)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
