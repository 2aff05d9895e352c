//! Operator console for the weeding robot.
//!
//! Sends mode, joystick and heartbeat datagrams to the coordinator's control plane from an
//! interactive prompt.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod cmd;
mod sender;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Report};
use comms_if::tc::{JoystickCmd, JoystickState};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::path::PathBuf;
use structopt::StructOpt;

use cmd::OperatorCmd;
use sender::{Sender, Targets};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "Weedbot $ ";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "weed_operator", about = "Operator console for the weeding robot")]
struct Opt {
    /// Address of the robot
    #[structopt(long, default_value = "127.0.0.1")]
    host: String,

    #[structopt(long, default_value = "5005")]
    mode_port: u16,

    #[structopt(long, default_value = "5006")]
    joystick_port: u16,

    #[structopt(long, default_value = "5007")]
    heartbeat_port: u16,

    /// Start the background heartbeat immediately
    #[structopt(long)]
    heartbeat: bool,

    #[structopt(long, default_value = "data/operator_history.txt", parse(from_os_str))]
    history: PathBuf,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    let targets = Targets::resolve(&opt.host, opt.mode_port, opt.joystick_port, opt.heartbeat_port)
        .wrap_err("Could not resolve the robot address")?;
    let mut sender = Sender::new(targets).wrap_err("Could not open the UDP socket")?;

    if opt.heartbeat {
        sender.start_heartbeat().wrap_err("Could not start the heartbeat")?;
    }

    let mut rl = DefaultEditor::new().wrap_err("Could not create the line editor")?;
    if rl.load_history(&opt.history).is_err() {
        println!("No history detected");
    }

    println!("Connected to {}, type help for a list of commands", opt.host);

    // Last joystick position, reused by the button command
    let mut joystick = JoystickState::default();

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Unhandled Error: {:?}", e);
                break;
            }
        };
        rl.add_history_entry(line.as_str()).ok();

        let result = match cmd::parse(&line) {
            Ok(OperatorCmd::Empty) => Ok(()),
            Ok(OperatorCmd::Quit) => break,
            Ok(OperatorCmd::Help) => {
                println!("{}", cmd::HELP);
                Ok(())
            }
            Ok(OperatorCmd::Mode(m)) => sender.send_mode(m),
            Ok(OperatorCmd::Joystick(j)) => {
                joystick = j.state;
                sender.send_joystick(&j)
            }
            Ok(OperatorCmd::Button) => sender.send_joystick(&JoystickCmd {
                state: joystick,
                button: true,
            }),
            Ok(OperatorCmd::Heartbeat) => sender.send_heartbeat(),
            Ok(OperatorCmd::HeartbeatOn) => {
                let r = sender.start_heartbeat();
                println!("Heartbeat running: {}", sender.is_heartbeat_running());
                r
            }
            Ok(OperatorCmd::HeartbeatOff) => {
                sender.stop_heartbeat();
                println!("Heartbeat stopped");
                Ok(())
            }
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("Send failed: {}", e);
        }
    }

    println!("Exiting...");

    if let Some(dir) = opt.history.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    rl.save_history(&opt.history)
        .wrap_err("Could not save the history")?;

    Ok(())
}
