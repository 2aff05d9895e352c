//! # Joystick commands
//!
//! The operator's joystick sends commands of the form `JOYSTICK:X=<int>,Y=<int>[,BUTTON:1]`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Serialize, Deserialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Prefix of a joystick position command.
pub const JOYSTICK_PREFIX: &str = "JOYSTICK:";

/// Marker appended to a command when the operator presses the action button.
pub const BUTTON_MARKER: &str = ",BUTTON:1";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Last known axis values of the operator's joystick.
///
/// Values are in the range -100 to +100 in practice, anything that fits an `i8` is accepted.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Default, Eq, PartialEq)]
pub struct JoystickState {
    pub x: i8,
    pub y: i8
}

/// A parsed joystick command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct JoystickCmd {
    /// Axis positions
    pub state: JoystickState,

    /// True if the button marker was present
    pub button: bool
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum JoystickParseError {
    #[error("Command does not start with {}", JOYSTICK_PREFIX)]
    NotAJoystickCmd,

    #[error("Missing the {0} axis field")]
    MissingAxis(char),

    #[error("Could not parse the {0} axis value \"{1}\"")]
    InvalidAxisValue(char, String),

    #[error("The {0} axis value {1} is out of range")]
    AxisOutOfRange(char, i64)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl JoystickCmd {
    /// Parse a joystick command from the raw command text.
    pub fn parse(cmd: &str) -> Result<Self, JoystickParseError> {
        let body = cmd.trim()
            .strip_prefix(JOYSTICK_PREFIX)
            .ok_or(JoystickParseError::NotAJoystickCmd)?;

        let mut x = None;
        let mut y = None;
        let mut button = false;

        for field in body.split(',').map(str::trim) {
            if let Some(v) = field.strip_prefix("X=") {
                x = Some(parse_axis('X', v)?);
            }
            else if let Some(v) = field.strip_prefix("Y=") {
                y = Some(parse_axis('Y', v)?);
            }
            else if field == BUTTON_MARKER.trim_start_matches(',') {
                button = true;
            }
        }

        Ok(Self {
            state: JoystickState {
                x: x.ok_or(JoystickParseError::MissingAxis('X'))?,
                y: y.ok_or(JoystickParseError::MissingAxis('Y'))?,
            },
            button
        })
    }
}

impl fmt::Display for JoystickCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}X={},Y={}", JOYSTICK_PREFIX, self.state.x, self.state.y)?;
        if self.button {
            f.write_str(BUTTON_MARKER)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// True if the command carries the button marker.
pub fn has_button(cmd: &str) -> bool {
    cmd.contains(BUTTON_MARKER)
}

/// Remove every button marker from the command.
///
/// The microcontroller never sees button markers, only the axis part of a command.
pub fn strip_button(cmd: &str) -> String {
    cmd.replace(BUTTON_MARKER, "")
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn parse_axis(axis: char, value: &str) -> Result<i8, JoystickParseError> {
    let wide: i64 = value.trim().parse()
        .map_err(|_| JoystickParseError::InvalidAxisValue(axis, value.into()))?;

    i8::try_from(wide).map_err(|_| JoystickParseError::AxisOutOfRange(axis, wide))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
