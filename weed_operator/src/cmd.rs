//! Operator console commands

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{
    tc::{JoystickCmd, JoystickState},
    Mode,
};
use std::convert::TryFrom;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

pub const HELP: &str = "\
Commands:
    mode <auto|manual|distortion|extrinsik>   change the operating mode
    joy <x> <y> [b]                           send a joystick position, b presses the button
    button                                    press the button at the last joystick position
    hb                                        send one heartbeat
    hb on|off                                 start or stop the 1 Hz heartbeat
    help                                      show this message
    quit                                      exit the console";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCmd {
    Mode(Mode),
    Joystick(JoystickCmd),
    Button,
    Heartbeat,
    HeartbeatOn,
    HeartbeatOff,
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Error, PartialEq)]
pub enum CmdParseError {
    #[error("Unknown command \"{0}\", type help for a list of commands")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("{0}")]
    InvalidMode(comms_if::tc::ModeParseError),

    #[error("Axis value \"{0}\" is not an integer between -128 and 127")]
    InvalidAxis(String),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse one line typed by the operator.
pub fn parse(line: &str) -> Result<OperatorCmd, CmdParseError> {
    let words: Vec<&str> = line.split_whitespace().collect();

    match words.as_slice() {
        [] => Ok(OperatorCmd::Empty),
        ["mode", name] => Mode::from_token(name)
            .map(OperatorCmd::Mode)
            .map_err(CmdParseError::InvalidMode),
        ["mode", ..] => Err(CmdParseError::Usage("mode <name>")),
        ["joy", x, y] => Ok(OperatorCmd::Joystick(joystick(x, y, false)?)),
        ["joy", x, y, "b"] => Ok(OperatorCmd::Joystick(joystick(x, y, true)?)),
        ["joy", ..] => Err(CmdParseError::Usage("joy <x> <y> [b]")),
        ["button"] => Ok(OperatorCmd::Button),
        ["hb"] => Ok(OperatorCmd::Heartbeat),
        ["hb", "on"] => Ok(OperatorCmd::HeartbeatOn),
        ["hb", "off"] => Ok(OperatorCmd::HeartbeatOff),
        ["hb", ..] => Err(CmdParseError::Usage("hb [on|off]")),
        ["help"] => Ok(OperatorCmd::Help),
        ["quit"] | ["exit"] => Ok(OperatorCmd::Quit),
        [other, ..] => Err(CmdParseError::UnknownCommand(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn joystick(x: &str, y: &str, button: bool) -> Result<JoystickCmd, CmdParseError> {
    Ok(JoystickCmd {
        state: JoystickState {
            x: axis(x)?,
            y: axis(y)?,
        },
        button,
    })
}

fn axis(value: &str) -> Result<i8, CmdParseError> {
    value
        .parse::<i64>()
        .ok()
        .and_then(|v| i8::try_from(v).ok())
        .ok_or_else(|| CmdParseError::InvalidAxis(value.into()))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("mode manual"), Ok(OperatorCmd::Mode(Mode::Manual)));
        assert_eq!(parse("  "), Ok(OperatorCmd::Empty));
        assert_eq!(parse("hb on"), Ok(OperatorCmd::HeartbeatOn));
        assert_eq!(parse("quit"), Ok(OperatorCmd::Quit));

        match parse("joy -40 75 b") {
            Ok(OperatorCmd::Joystick(j)) => {
                assert_eq!(j.to_string(), "JOYSTICK:X=-40,Y=75,BUTTON:1")
            }
            r => panic!("Unexpected parse result {:?}", r),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("mode"), Err(CmdParseError::Usage(_))));
        assert!(matches!(parse("mode turbo"), Err(CmdParseError::InvalidMode(_))));
        assert_eq!(
            parse("joy 200 0"),
            Err(CmdParseError::InvalidAxis("200".into()))
        );
        assert_eq!(
            parse("fly"),
            Err(CmdParseError::UnknownCommand("fly".into()))
        );
    }
}
