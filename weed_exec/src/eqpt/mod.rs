//! # Equipment
//!
//! Contracts of the collaborators the coordinator drives but does not implement: the camera,
//! the object detector, the marker/board vision library, the operator video stream and the
//! training image capture. Every call returns a `Result` so that a failing collaborator is
//! turned into "no result" at the call site rather than unwinding into the coordinator.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod detector;
pub mod sim;
pub mod vision;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use image::DynamicImage;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// The camera.
pub trait CameraSource: Send + Sync {
    /// Grab the current live frame.
    fn capture_frame(&self) -> Result<DynamicImage, EqptError>;

    /// Take a still for detection, undistorted with the loaded calibration if `undistort` is
    /// set and a calibration is available.
    fn capture_still(&self, undistort: bool) -> Result<DynamicImage, EqptError>;

    /// Load the calibration file again after a new calibration was saved.
    fn reload_calibration(&self) -> Result<(), EqptError>;
}

/// The object detector.
pub trait Detector: Send + Sync {
    /// Pixel centres of the objects found in the image.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<(f64, f64)>, EqptError>;
}

/// The operator video stream.
pub trait StreamCtrl: Send + Sync {
    fn start(&self) -> Result<(), EqptError>;

    fn stop(&self) -> Result<(), EqptError>;
}

/// Capture of training images in manual mode.
pub trait TrainingCapture: Send + Sync {
    /// Capture one training image, returning where it was stored.
    fn capture(&self) -> Result<PathBuf, EqptError>;
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EqptError {
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("Camera capture failed: {0}")]
    CaptureError(String),

    #[error("Detection failed: {0}")]
    DetectionError(String),

    #[error("Detection did not complete within {0:.1} s")]
    Timeout(f64),

    #[error("Vision library error: {0}")]
    VisionError(String),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
