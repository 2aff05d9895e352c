//! Routing of joystick/command datagrams

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{
    mcu::McuCmd,
    tc::{has_button, strip_button, JoystickCmd, JoystickState, JOYSTICK_PREFIX},
    Mode,
};
use log::{debug, warn};
use std::sync::{mpsc::Sender, Arc, Mutex};

use crate::mode_ctrl::{ControlEvent, ModeCtrl};
use crate::serial_link::McuLink;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handles commands recieved on the joystick channel.
pub struct CommandRouter {
    mode_ctrl: Arc<ModeCtrl>,
    link: Arc<dyn McuLink>,
    joystick: Mutex<JoystickState>,
    events: Mutex<Sender<ControlEvent>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CommandRouter {
    pub fn new(
        mode_ctrl: Arc<ModeCtrl>,
        link: Arc<dyn McuLink>,
        events: Sender<ControlEvent>,
    ) -> Self {
        Self {
            mode_ctrl,
            link,
            joystick: Mutex::new(JoystickState::default()),
            events: Mutex::new(events),
        }
    }

    /// Last known joystick position.
    pub fn joystick(&self) -> JoystickState {
        *self.joystick.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle one command, returning true if it was acted upon.
    ///
    /// - A joystick position is always stored.
    /// - In `MANUAL` the command is forwarded to the microcontroller without the button marker,
    ///   unless nothing is left once the marker is removed.
    /// - A button press is posted to the control thread, tagged with the mode it was made in,
    ///   in every mode but `AUTO`.
    pub fn handle_command(&self, cmd: &str) -> bool {
        let cmd = cmd.trim();

        if cmd.starts_with(JOYSTICK_PREFIX) {
            match JoystickCmd::parse(cmd) {
                Ok(j) => {
                    *self.joystick.lock().unwrap_or_else(|e| e.into_inner()) = j.state
                }
                Err(e) => debug!("Malformed joystick command \"{}\": {}", cmd, e),
            }
        }

        let mode = self.mode_ctrl.mode();
        let mut acted = false;

        if mode == Mode::Manual {
            let fwd = strip_button(cmd);
            if fwd.trim().is_empty() {
                debug!("Nothing to forward in \"{}\"", cmd);
            }
            else {
                match self.link.send(&McuCmd::Forward(fwd).to_string()) {
                    Ok(()) => acted = true,
                    Err(e) => warn!("Could not forward the command: {}", e),
                }
            }
        }

        if has_button(cmd) && (mode == Mode::Manual || mode.is_calibration()) {
            match self
                .events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .send(ControlEvent::Button(mode))
            {
                Ok(()) => acted = true,
                Err(_) => warn!("Control thread has stopped, button press dropped"),
            }
        }

        acted
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mode_ctrl::store::RecoveryFile;
    use crate::serial_link::fakes::RecordingLink;
    use std::sync::mpsc::{self, Receiver};

    fn router() -> (tempfile::TempDir, Arc<RecordingLink>, Arc<ModeCtrl>, CommandRouter, Receiver<ControlEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let link = Arc::new(RecordingLink::default());
        let mode_ctrl = Arc::new(ModeCtrl::new(
            link.clone(),
            Box::new(RecoveryFile::new(dir.path().join("mode.txt"))),
        ));
        let (tx, rx) = mpsc::channel();
        let r = CommandRouter::new(mode_ctrl.clone(), link.clone(), tx);
        (dir, link, mode_ctrl, r, rx)
    }

    #[test]
    fn test_joystick_stored_in_any_mode() {
        let (_dir, link, _mode, r, _rx) = router();

        assert!(!r.handle_command("JOYSTICK:X=-40,Y=75"));
        assert_eq!(r.joystick(), JoystickState { x: -40, y: 75 });

        // Malformed keeps the last value
        assert!(!r.handle_command("JOYSTICK:X=abc,Y=1"));
        assert_eq!(r.joystick(), JoystickState { x: -40, y: 75 });

        // Nothing reaches the microcontroller in AUTO
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_manual_forwarding_strips_button() {
        let (_dir, link, mode, r, rx) = router();
        mode.set_mode(Mode::Manual);

        assert!(r.handle_command("JOYSTICK:X=10,Y=-5,BUTTON:1"));
        assert!(r.handle_command("JOYSTICK:X=0,Y=0"));

        assert_eq!(
            link.sent(),
            vec!["MODE:MANUAL", "JOYSTICK:X=10,Y=-5", "JOYSTICK:X=0,Y=0"]
        );
        assert_eq!(rx.try_recv(), Ok(ControlEvent::Button(Mode::Manual)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_button_in_calibration_modes() {
        let (_dir, link, mode, r, rx) = router();

        // Ignored in AUTO
        assert!(!r.handle_command("JOYSTICK:X=0,Y=0,BUTTON:1"));
        assert!(rx.try_recv().is_err());

        mode.set_mode(Mode::Distortion);
        assert!(r.handle_command("JOYSTICK:X=0,Y=0,BUTTON:1"));
        assert_eq!(rx.try_recv(), Ok(ControlEvent::Button(Mode::Distortion)));

        mode.set_mode(Mode::Extrinsik);
        assert!(r.handle_command("JOYSTICK:X=0,Y=0,BUTTON:1"));
        assert_eq!(rx.try_recv(), Ok(ControlEvent::Button(Mode::Extrinsik)));

        // Only the mode commands were sent
        assert_eq!(link.sent(), vec!["MODE:DISTORTION", "MODE:EXTRINSIK"]);
    }

    #[test]
    fn test_bare_button_not_forwarded() {
        let (_dir, link, mode, r, rx) = router();
        mode.set_mode(Mode::Manual);

        // The press still reaches the control thread
        assert!(r.handle_command(",BUTTON:1"));
        assert_eq!(rx.try_recv(), Ok(ControlEvent::Button(Mode::Manual)));

        assert!(!r.handle_command("   "));
        assert_eq!(link.sent(), vec!["MODE:MANUAL"]);
    }
}
