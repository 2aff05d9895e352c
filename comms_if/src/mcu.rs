//! # Microcontroller Line Protocol
//!
//! The ground microcontroller is driven over a line oriented ASCII protocol. Every message is a
//! single line terminated by `\n`. There is no checksum and no acknowledgement, delivery is
//! at-most-once.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt;

use crate::tc::Mode;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sent by the microcontroller to request a detection cycle.
pub const DETECTION_REQUEST: &str = "GETXY";

/// Sent to the microcontroller once all coordinates of a detection cycle have been sent.
pub const DONE: &str = "DONE";

/// Sent to the microcontroller once the link has been opened.
pub const START: &str = "START";

/// Prefix of a mode change command.
pub const MODE_PREFIX: &str = "MODE:";

/// Prefix of a coordinate command.
pub const XY_PREFIX: &str = "XY:";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Commands sent to the microcontroller.
#[derive(Debug, Clone, PartialEq)]
pub enum McuCmd {
    /// Coordinator started
    Start,

    /// The operating mode changed
    Mode(Mode),

    /// Position of one detected target, millimeters in the ground frame (or pixels if no world
    /// transform is available)
    Xy(f64, f64),

    /// End of a detection cycle
    Done,

    /// Operator command forwarded verbatim (manual driving)
    Forward(String)
}

/// Messages recieved from the microcontroller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McuMsg {
    /// Request for a detection cycle
    DetectionRequest,

    /// Any other line
    Other(String)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl fmt::Display for McuCmd {
    /// Format the command as it is written on the wire (without the line terminator).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McuCmd::Start => f.write_str(START),
            McuCmd::Mode(m) => write!(f, "{}{}", MODE_PREFIX, m),
            McuCmd::Xy(x, y) => write!(f, "{}{:.1},{:.1}", XY_PREFIX, x, y),
            McuCmd::Done => f.write_str(DONE),
            McuCmd::Forward(s) => f.write_str(s),
        }
    }
}

impl McuMsg {
    /// Classify a framed line from the microcontroller.
    pub fn from_line(line: &str) -> Self {
        match line.trim() {
            DETECTION_REQUEST => McuMsg::DetectionRequest,
            other => McuMsg::Other(other.to_string())
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cmd_format() {
        assert_eq!(McuCmd::Start.to_string(), "START");
        assert_eq!(McuCmd::Mode(Mode::Distortion).to_string(), "MODE:DISTORTION");
        assert_eq!(McuCmd::Xy(100.0, -20.04).to_string(), "XY:100.0,-20.0");
        assert_eq!(McuCmd::Xy(12.34, 7.0).to_string(), "XY:12.3,7.0");
        assert_eq!(McuCmd::Done.to_string(), "DONE");
        assert_eq!(
            McuCmd::Forward("JOYSTICK:X=1,Y=2".into()).to_string(), 
            "JOYSTICK:X=1,Y=2"
        );
    }

    #[test]
    fn test_msg_classify() {
        assert_eq!(McuMsg::from_line("GETXY"), McuMsg::DetectionRequest);
        assert_eq!(McuMsg::from_line(" GETXY\r"), McuMsg::DetectionRequest);
        assert_eq!(McuMsg::from_line("READY"), McuMsg::Other("READY".into()));
    }
}
