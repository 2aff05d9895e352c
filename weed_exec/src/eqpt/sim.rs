//! Simulated equipment
//!
//! Used when the coordinator runs without the camera and inference hardware, e.g. against a
//! virtual serial port on a development machine.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::Utc;
use image::{DynamicImage, GrayImage};
use log::{debug, info};
use nalgebra::Matrix3;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use super::{
    vision::{
        BoardDetection, BoardGeometry, BoardPose, Intrinsics, RemapTables, Roi, VisionCaps,
        VisionLib,
    },
    CameraSource, Detector, EqptError, StreamCtrl, TrainingCapture,
};
use crate::params::EqptParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Camera returning a fixed image, or a blank frame of the configured resolution.
pub struct SimCamera {
    frame_path: Option<PathBuf>,
    resolution: [u32; 2],
}

/// Detector returning fixed detections whatever the image.
pub struct DummyDetector {
    detections: Vec<(f64, f64)>,
}

/// A vision library with no capabilities, calibration is unavailable.
pub struct NoVision;

/// Video stream which only records whether it is running.
#[derive(Default)]
pub struct LogStream {
    on: AtomicBool,
}

/// Saves the current camera frame as a PNG into a directory.
pub struct FrameSaver {
    camera: Arc<dyn CameraSource>,
    dir: PathBuf,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimCamera {
    pub fn new(params: &EqptParams) -> Self {
        Self {
            frame_path: params.frame_path.clone(),
            resolution: params.resolution,
        }
    }
}

impl CameraSource for SimCamera {
    fn capture_frame(&self) -> Result<DynamicImage, EqptError> {
        match self.frame_path {
            Some(ref p) => Ok(image::open(p)?),
            None => Ok(DynamicImage::new_rgb8(self.resolution[0], self.resolution[1])),
        }
    }

    fn capture_still(&self, _undistort: bool) -> Result<DynamicImage, EqptError> {
        self.capture_frame()
    }

    fn reload_calibration(&self) -> Result<(), EqptError> {
        debug!("Simulated camera has no calibration to reload");
        Ok(())
    }
}

impl DummyDetector {
    pub fn new(params: &EqptParams) -> Self {
        Self {
            detections: params.dummy_detections.iter().map(|p| (p[0], p[1])).collect(),
        }
    }
}

impl Detector for DummyDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<(f64, f64)>, EqptError> {
        Ok(self.detections.clone())
    }
}

impl VisionLib for NoVision {
    fn capabilities(&self) -> VisionCaps {
        VisionCaps::default()
    }

    fn detect_board(&self, _: &GrayImage, _: &BoardGeometry) -> Result<BoardDetection, EqptError> {
        Err(EqptError::Unavailable("Board detection"))
    }

    fn calibrate_charuco(
        &self,
        _: &[&BoardDetection],
        _: &BoardGeometry,
        _: (u32, u32),
    ) -> Result<Intrinsics, EqptError> {
        Err(EqptError::Unavailable("Charuco calibration"))
    }

    fn calibrate_aruco(
        &self,
        _: &[&BoardDetection],
        _: &BoardGeometry,
        _: (u32, u32),
    ) -> Result<Intrinsics, EqptError> {
        Err(EqptError::Unavailable("Aruco calibration"))
    }

    fn optimal_new_camera_matrix(
        &self,
        _: &Intrinsics,
        _: (u32, u32),
        _: f64,
    ) -> Result<(Matrix3<f64>, Roi), EqptError> {
        Err(EqptError::Unavailable("Optimal camera matrix"))
    }

    fn undistort_rectify_maps(
        &self,
        _: &Intrinsics,
        _: &Matrix3<f64>,
        _: (u32, u32),
    ) -> Result<RemapTables, EqptError> {
        Err(EqptError::Unavailable("Undistortion maps"))
    }

    fn estimate_board_pose(
        &self,
        _: &BoardDetection,
        _: &BoardGeometry,
        _: &Matrix3<f64>,
        _: &[f64],
    ) -> Result<BoardPose, EqptError> {
        Err(EqptError::Unavailable("Board pose estimation"))
    }
}

impl LogStream {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

impl StreamCtrl for LogStream {
    fn start(&self) -> Result<(), EqptError> {
        self.on.store(true, Ordering::SeqCst);
        info!("Video stream started");
        Ok(())
    }

    fn stop(&self) -> Result<(), EqptError> {
        self.on.store(false, Ordering::SeqCst);
        info!("Video stream stopped");
        Ok(())
    }
}

impl FrameSaver {
    pub fn new<P: Into<PathBuf>>(camera: Arc<dyn CameraSource>, dir: P) -> Self {
        Self {
            camera,
            dir: dir.into(),
        }
    }
}

impl TrainingCapture for FrameSaver {
    fn capture(&self) -> Result<PathBuf, EqptError> {
        let frame = self.camera.capture_frame()?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("train_{}.png", Utc::now().format("%Y%m%d_%H%M%S_%3f")));
        frame.save(&path)?;

        info!("Training image saved to {:?}", path);
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn test_sim_camera_blank() {
        let cam = SimCamera::new(&EqptParams::default());
        let frame = cam.capture_still(true).unwrap();
        assert_eq!(frame.dimensions(), (640, 480));
    }

    #[test]
    fn test_frame_saver() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = EqptParams::default();
        params.resolution = [8, 6];

        let saver = FrameSaver::new(Arc::new(SimCamera::new(&params)), dir.path().join("train"));
        let path = saver.capture().unwrap();

        assert!(path.starts_with(dir.path()));
        assert_eq!(image::open(&path).unwrap().dimensions(), (8, 6));
    }

    #[test]
    fn test_dummy_detector() {
        let d = DummyDetector::new(&EqptParams::default());
        assert_eq!(d.detect(&DynamicImage::new_rgb8(1, 1)).unwrap(), vec![(100.0, 200.0)]);
    }
}
