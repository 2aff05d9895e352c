//! Detector call with a hard timeout

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use image::DynamicImage;
use log::warn;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use super::{Detector, EqptError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Runs each detection on a worker thread and gives up after a timeout.
///
/// A detection which times out is left to finish in the background, its result is discarded.
pub struct TimedDetector {
    inner: Arc<dyn Detector>,
    timeout: Duration,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TimedDetector {
    pub fn new(inner: Arc<dyn Detector>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Run the detector, returning the detections or the reason there are none.
    pub fn detect(&self, image: DynamicImage) -> Result<Vec<(f64, f64)>, EqptError> {
        let (tx, rx) = mpsc::channel();
        let detector = self.inner.clone();

        thread::Builder::new()
            .name("detector".into())
            .spawn(move || {
                // Receiver may have timed out already
                tx.send(detector.detect(&image)).ok();
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(EqptError::Timeout(self.timeout.as_secs_f64()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(EqptError::DetectionError("detector thread panicked".into()))
            }
        }
    }

    /// Run the detector, a failure or timeout is logged and gives no detections.
    pub fn detect_or_empty(&self, image: DynamicImage) -> Vec<(f64, f64)> {
        match self.detect(image) {
            Ok(d) => d,
            Err(e) => {
                warn!("No detections: {}", e);
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
