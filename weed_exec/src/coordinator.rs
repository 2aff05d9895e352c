//! # Coordinator
//!
//! One cycle of the automatic weeding loop. While the robot is in `AUTO` each cycle takes at
//! most one line from the microcontroller. A detection request is answered by taking a still,
//! running the detector, converting the object centres to ground coordinates and sending one
//! `XY` command per object followed by `DONE`. In every other mode the cycle does nothing.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{
    mcu::{McuCmd, McuMsg},
    Mode,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::eqpt::{detector::TimedDetector, CameraSource};
use crate::geom::WorldTransform;
use crate::mode_ctrl::ModeCtrl;
use crate::params::AutoParams;
use crate::serial_link::McuLink;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The automatic detection loop.
pub struct Coordinator {
    mode_ctrl: Arc<ModeCtrl>,
    link: Arc<dyn McuLink>,
    camera: Arc<dyn CameraSource>,
    detector: TimedDetector,
    transform: Arc<WorldTransform>,

    undistort_stills: bool,
    use_world_coords: bool,
    xy_send_delay: Duration,
}

/// One target sent to the microcontroller, archived to `targets.csv`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Target {
    pub time_s: f64,

    /// Pixel centre from the detector
    pub px: f64,
    pub py: f64,

    /// Coordinates sent, millimetres if `world` is set, pixels otherwise
    pub x: f64,
    pub y: f64,
    pub world: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Coordinator {
    pub fn new(
        mode_ctrl: Arc<ModeCtrl>,
        link: Arc<dyn McuLink>,
        camera: Arc<dyn CameraSource>,
        detector: TimedDetector,
        transform: Arc<WorldTransform>,
        params: &AutoParams,
    ) -> Self {
        Self {
            mode_ctrl,
            link,
            camera,
            detector,
            transform,
            undistort_stills: params.undistort_stills,
            use_world_coords: params.use_world_coords,
            xy_send_delay: params.xy_send_delay(),
        }
    }

    /// Run one cycle.
    ///
    /// Returns the targets sent if a detection request was answered, `None` otherwise.
    pub fn tick(&self) -> Option<Vec<Target>> {
        if self.mode_ctrl.mode() != Mode::Auto {
            return None;
        }

        match McuMsg::from_line(&self.link.read_line()?) {
            McuMsg::DetectionRequest => Some(self.detection_cycle()),
            McuMsg::Other(line) => {
                debug!("Ignoring line from the microcontroller: \"{}\"", line);
                None
            }
        }
    }

    fn detection_cycle(&self) -> Vec<Target> {
        let centres = match self.camera.capture_still(self.undistort_stills) {
            Ok(img) => self.detector.detect_or_empty(img),
            Err(e) => {
                warn!("Could not capture a still for detection: {}", e);
                Vec::new()
            }
        };

        // Take one snapshot so every target of the cycle uses the same model
        let model = self.transform.snapshot();
        if self.use_world_coords && !model.is_ready() {
            debug!("World transform not loaded, sending pixel coordinates");
        }

        let mut targets = Vec::with_capacity(centres.len());

        for (px, py) in centres {
            let world = if self.use_world_coords {
                model.pixel_to_world(px, py)
            }
            else {
                None
            };

            let (x, y) = world.unwrap_or((px, py));

            self.send(&McuCmd::Xy(x, y));
            thread::sleep(self.xy_send_delay);

            targets.push(Target {
                time_s: util::session::get_elapsed_seconds(),
                px,
                py,
                x,
                y,
                world: world.is_some(),
            });
        }

        self.send(&McuCmd::Done);
        info!("Detection cycle complete, {} target(s) sent", targets.len());

        targets
    }

    fn send(&self, cmd: &McuCmd) {
        if let Err(e) = self.link.send(&cmd.to_string()) {
            warn!("Could not send \"{}\" to the microcontroller: {}", cmd, e);
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
