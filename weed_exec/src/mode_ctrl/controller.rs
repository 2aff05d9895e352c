//! Control thread
//!
//! Mode changes and button presses from the operator are posted as [`ControlEvent`]s and
//! handled one at a time by the [`Controller`], which is the only owner of the calibration
//! session. Entry and exit actions of the modes are run as part of the transition.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::Mode;
use log::{debug, info, warn};
use std::sync::{mpsc::Receiver, Arc};

use super::ModeCtrl;
use crate::calib::{
    extrinsic::estimate_extrinsics, session::ClickOutcome, CalibCtx, CalibrationSession,
};
use crate::eqpt::TrainingCapture;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drives mode transitions and button actions.
pub struct Controller {
    mode_ctrl: Arc<ModeCtrl>,
    calib: CalibCtx,
    training: Arc<dyn TrainingCapture>,

    /// Live calibration session, only ever touched by the control thread
    session: Option<CalibrationSession>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Requests for the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    SetMode(Mode),

    /// The operator pressed the action button while the robot was in the given mode
    Button(Mode),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Controller {
    pub fn new(
        mode_ctrl: Arc<ModeCtrl>,
        calib: CalibCtx,
        training: Arc<dyn TrainingCapture>,
    ) -> Self {
        Self {
            mode_ctrl,
            calib,
            training,
            session: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode_ctrl.mode()
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    /// Apply the mode persisted by a previous run, returning the mode in force.
    pub fn restore(&mut self) -> Mode {
        match self.mode_ctrl.persisted() {
            Some(m) => {
                info!("Restoring persisted mode {}", m);
                self.set_mode(m);
            }
            None => info!("No persisted mode, starting in {}", self.mode()),
        }

        self.mode()
    }

    /// Transition to `mode`, running the exit and entry actions.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        let calib = &self.calib;
        let session = &mut self.session;

        self.mode_ctrl
            .set_mode_with(mode, |_, new| on_transition(calib, session, new))
    }

    /// Handle a button press made in `pressed_in`, returning true if it was acted upon.
    ///
    /// A press made in a mode the robot has since left is dropped.
    pub fn handle_button(&mut self, pressed_in: Mode) -> bool {
        if pressed_in != self.mode() {
            info!(
                "Button pressed in {} dropped, the robot is now in {}",
                pressed_in,
                self.mode()
            );
            return false;
        }

        match pressed_in {
            Mode::Auto => {
                debug!("Button ignored in AUTO");
                false
            }
            Mode::Manual => {
                match self.training.capture() {
                    Ok(p) => info!("Training image captured: {:?}", p),
                    Err(e) => warn!("Training capture failed: {}", e),
                }
                true
            }
            Mode::Distortion => {
                self.calibration_click();
                true
            }
            Mode::Extrinsik => {
                match estimate_extrinsics(&self.calib) {
                    Ok(r) => info!("Extrinsics estimated from {} corners", r.corners),
                    Err(e) => warn!("Extrinsic estimation failed: {}", e),
                }
                true
            }
        }
    }

    pub fn handle(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::SetMode(m) => {
                self.set_mode(m);
            }
            ControlEvent::Button(m) => {
                self.handle_button(m);
            }
        }
    }

    /// Handle events until every sender has gone.
    pub fn run(mut self, events: Receiver<ControlEvent>) {
        while let Ok(event) = events.recv() {
            self.handle(event);
        }

        info!("Control thread exiting");
    }

    fn calibration_click(&mut self) {
        if !self.calib.strategy.is_available() {
            self.calib.status.set_message("Calibration unavailable");
            return;
        }

        if self.session.as_ref().map_or(true, |s| s.is_done()) {
            info!("Starting a new calibration session");
            self.session = Some(CalibrationSession::new(self.calib.target_snapshots));
        }

        let done = match self.session {
            Some(ref mut s) => {
                match s.click(&self.calib) {
                    Ok(ClickOutcome::Collected { n, target }) => {
                        debug!("Snapshot {}/{}", n, target)
                    }
                    Ok(ClickOutcome::Finalized(r)) => info!(
                        "Calibration finished, reprojection error {:.3} px",
                        r.reproj_err
                    ),
                    Err(e) => warn!("Calibration click failed: {}", e),
                }
                s.is_done()
            }
            None => return,
        };

        // A finished session is discarded, the next click starts a new one
        if done {
            self.session = None;
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Exit and entry actions, run under the mode lock.
fn on_transition(calib: &CalibCtx, session: &mut Option<CalibrationSession>, new: Mode) {
    if let Some(s) = session.take() {
        info!("Calibration session discarded after {} snapshots", s.collected());
    }

    match new {
        Mode::Distortion => {
            if !calib.strategy.is_available() {
                calib.status.set_message("Calibration unavailable");
                return;
            }

            *session = Some(CalibrationSession::new(calib.target_snapshots));
            calib.status.set_message(&format!(
                "Calibration: show the board and click to capture (0/{})",
                calib.target_snapshots
            ));
            publish_banner(calib, "click to start");
        }
        Mode::Extrinsik => {
            calib
                .status
                .set_message("Extrinsics: place the board on the ground and click");
            publish_banner(calib, "click to estimate");
        }
        Mode::Auto | Mode::Manual => (),
    }
}

fn publish_banner(calib: &CalibCtx, caption: &str) {
    match calib.camera.capture_frame() {
        Ok(f) => calib.status.publish_preview(caption, &f),
        Err(e) => debug!("No preview frame: {}", e),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
