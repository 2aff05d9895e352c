//! # Camera calibration
//!
//! Interactive intrinsic calibration from a series of board snapshots, see [`session`], and
//! one-shot estimation of the camera pose relative to the ground, see [`extrinsic`]. The
//! detection and solving itself is delegated to a [`VisionLib`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod extrinsic;
pub mod files;
pub mod session;
pub mod solve;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    eqpt::{vision::{BoardGeometry, VisionLib}, CameraSource, EqptError},
    geom::{GeomError, WorldTransform},
    status::StatusSink,
};

pub use session::CalibrationSession;
pub use solve::SolveStrategy;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Collaborators and settings shared by calibration and extrinsic estimation.
#[derive(Clone)]
pub struct CalibCtx {
    pub camera: Arc<dyn CameraSource>,

    pub vision: Arc<dyn VisionLib>,

    pub status: Arc<dyn StatusSink>,

    pub transform: Arc<WorldTransform>,

    pub board: BoardGeometry,

    /// Resolved once from the vision library's capabilities
    pub strategy: SolveStrategy,

    pub calibration_path: PathBuf,

    pub extrinsics_path: PathBuf,

    pub target_snapshots: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CalibError {
    #[error("Calibration is unavailable, the vision library cannot solve intrinsics")]
    Unavailable,

    #[error("Extrinsics are unavailable, the vision library cannot estimate a board pose")]
    PoseUnavailable,

    #[error("The calibration session is finished, start a new one")]
    SessionFinished,

    #[error("Could not capture a frame: {0}")]
    CaptureError(EqptError),

    #[error("Only {found} views with enough board corners, {needed} are needed")]
    InsufficientViews { found: usize, needed: usize },

    #[error("No marker data collected")]
    NoMarkerData,

    #[error("Calibration solve failed: {0}")]
    SolveError(EqptError),

    #[error("No intrinsics available ({0:?}): {1}")]
    MissingIntrinsics(PathBuf, String),

    #[error("No markers found")]
    NoMarkers,

    #[error("Only {0} board corners found, at least 4 are needed")]
    TooFewCorners(usize),

    #[error("Board pose estimation failed: {0}")]
    PoseError(EqptError),

    #[error("Could not encode the calibration: {0}")]
    EncodeError(rmp_serde::encode::Error),

    #[error("Could not decode the calibration: {0}")]
    DecodeError(rmp_serde::decode::Error),

    #[error("Could not access the calibration file {0:?}: {1}")]
    FileError(PathBuf, std::io::Error),

    #[error("Could not save the geometry: {0}")]
    GeomError(#[from] GeomError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CalibCtx {
    /// Grab a frame, normalised to RGB.
    pub(crate) fn rgb_frame(&self) -> Result<image::DynamicImage, CalibError> {
        let frame = self.camera.capture_frame().map_err(CalibError::CaptureError)?;
        Ok(image::DynamicImage::ImageRgb8(frame.to_rgb8()))
    }
}

// ---------------------------------------------------------------------------
// TEST UTILITIES
// ---------------------------------------------------------------------------

/// Fakes shared by the calibration tests.
#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::eqpt::vision::*;
    use crate::status::StatusBus;
    use image::{DynamicImage, GrayImage};
    use nalgebra::{Matrix3, Vector3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct FakeCamera {
        pub reloads: AtomicUsize,
    }

    impl CameraSource for FakeCamera {
        fn capture_frame(&self) -> Result<DynamicImage, EqptError> {
            Ok(DynamicImage::new_rgb8(64, 48))
        }

        fn capture_still(&self, _: bool) -> Result<DynamicImage, EqptError> {
            self.capture_frame()
        }

        fn reload_calibration(&self) -> Result<(), EqptError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Vision library returning queued detections, then `default_detection`.
    pub struct FakeVision {
        pub caps: VisionCaps,
        pub queued: Mutex<Vec<BoardDetection>>,
        pub default_detection: BoardDetection,
        pub charuco_calls: AtomicUsize,
        pub aruco_calls: AtomicUsize,
        pub pose: Option<BoardPose>,
    }

    pub fn detection(markers: usize, corners: usize) -> BoardDetection {
        BoardDetection {
            marker_corners: vec![[[0.0; 2]; 4]; markers],
            marker_ids: (0..markers as i32).collect(),
            board_corners: vec![[1.0, 1.0]; corners],
            board_ids: (0..corners as i32).collect(),
        }
    }

    pub fn intrinsics() -> Intrinsics {
        Intrinsics {
            k: Matrix3::new(50.0, 0.0, 32.0, 0.0, 50.0, 24.0, 0.0, 0.0, 1.0),
            d: vec![0.1, -0.01, 0.0, 0.0, 0.0],
            reproj_err: 0.25,
        }
    }

    impl FakeVision {
        pub fn new(caps: VisionCaps, default_detection: BoardDetection) -> Self {
            Self {
                caps,
                queued: Mutex::new(Vec::new()),
                default_detection,
                charuco_calls: AtomicUsize::new(0),
                aruco_calls: AtomicUsize::new(0),
                pose: Some(BoardPose {
                    r: Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0),
                    t: Vector3::new(0.0, 0.0, 1000.0),
                }),
            }
        }

        pub fn full() -> Self {
            Self::new(
                VisionCaps { charuco_solve: true, aruco_solve: true, pose: true },
                detection(6, 8),
            )
        }
    }

    impl VisionLib for FakeVision {
        fn capabilities(&self) -> VisionCaps {
            self.caps
        }

        fn detect_board(
            &self, _: &GrayImage, _: &BoardGeometry
        ) -> Result<BoardDetection, EqptError> {
            let mut q = self.queued.lock().unwrap();
            if q.is_empty() {
                Ok(self.default_detection.clone())
            }
            else {
                Ok(q.remove(0))
            }
        }

        fn calibrate_charuco(
            &self, views: &[&BoardDetection], _: &BoardGeometry, _: (u32, u32)
        ) -> Result<Intrinsics, EqptError> {
            assert!(views.iter().all(|v| v.is_rich()));
            self.charuco_calls.fetch_add(1, Ordering::SeqCst);
            Ok(intrinsics())
        }

        fn calibrate_aruco(
            &self, views: &[&BoardDetection], _: &BoardGeometry, _: (u32, u32)
        ) -> Result<Intrinsics, EqptError> {
            assert!(views.iter().all(|v| v.num_markers() > 0));
            self.aruco_calls.fetch_add(1, Ordering::SeqCst);
            Ok(intrinsics())
        }

        fn optimal_new_camera_matrix(
            &self, i: &Intrinsics, size: (u32, u32), alpha: f64
        ) -> Result<(Matrix3<f64>, Roi), EqptError> {
            assert_eq!(alpha, 0.0);
            Ok((i.k * 0.9, Roi { x: 2, y: 2, width: size.0 - 4, height: size.1 - 4 }))
        }

        fn undistort_rectify_maps(
            &self, _: &Intrinsics, _: &Matrix3<f64>, size: (u32, u32)
        ) -> Result<RemapTables, EqptError> {
            let n = (size.0 * size.1) as usize;
            Ok(RemapTables {
                width: size.0,
                height: size.1,
                map1: vec![0; 2 * n],
                map2: vec![0; n],
            })
        }

        fn estimate_board_pose(
            &self, _: &BoardDetection, _: &BoardGeometry, _: &Matrix3<f64>, _: &[f64]
        ) -> Result<BoardPose, EqptError> {
            self.pose.clone().ok_or(EqptError::VisionError("no pose".into()))
        }
    }

    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub camera: Arc<FakeCamera>,
        pub vision: Arc<FakeVision>,
        pub status: Arc<StatusBus>,
        pub ctx: CalibCtx,
    }

    pub fn fixture(vision: FakeVision, target: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(FakeCamera { reloads: AtomicUsize::new(0) });
        let vision = Arc::new(vision);
        let status = Arc::new(StatusBus::new());
        let transform = Arc::new(WorldTransform::new(
            dir.path().join("homography.json"),
            dir.path().join("extrinsics.json"),
        ));

        let ctx = CalibCtx {
            camera: camera.clone(),
            vision: vision.clone(),
            status: status.clone(),
            transform,
            board: BoardGeometry::from(&crate::params::BoardParams::default()),
            strategy: SolveStrategy::from_caps(vision.capabilities()),
            calibration_path: dir.path().join("calibration.msgpack"),
            extrinsics_path: dir.path().join("extrinsics.json"),
            target_snapshots: target,
        };

        Fixture { dir, camera, vision, status, ctx }
    }
}
