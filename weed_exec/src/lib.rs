//! # Weeding robot coordinator library.
//!
//! This library allows the executable and the integration tests to access items defined inside
//! the coordinator crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Calibration - interactive intrinsic calibration and extrinsic estimation
pub mod calib;

/// Coordinator - answers detection requests from the microcontroller while in AUTO
pub mod coordinator;

/// Control server - UDP mode, joystick and heartbeat channels
pub mod ctrl_server;

/// Equipment - camera, detector, vision library and stream collaborators
pub mod eqpt;

/// Geometry - pixel to ground plane transform
pub mod geom;

/// Mode control - the operating mode state machine and the control thread
pub mod mode_ctrl;

/// Executable parameters
pub mod params;

/// Serial link to the ground microcontroller
pub mod serial_link;

/// Status text and preview images for the operator
pub mod status;
