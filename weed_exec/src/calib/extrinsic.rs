//! One-shot extrinsic estimation
//!
//! Estimates the pose of the camera relative to the ground from a single frame of the board
//! lying flat on the ground. The board frame is taken as the world frame, so the ground is the
//! plane `Z = 0`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use nalgebra::Matrix3;

use super::{files::CalibrationFile, CalibCtx, CalibError};
use crate::eqpt::vision::{BoardPose, MIN_BOARD_CORNERS};
use crate::geom::files::{rows, ExtrinsicsFile};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const EXTRINSICS_NOTE: &str =
    "Board pose from a single frame; ground is Z=0; mm; X right, Y forward";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of a successful estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtrinsicReport {
    pub pose: BoardPose,

    /// Intrinsic matrix saved with the pose
    pub k: Matrix3<f64>,

    pub corners: usize,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Estimate and save the extrinsics, reporting the result on the status channel.
///
/// Nothing is written on failure.
pub fn estimate_extrinsics(ctx: &CalibCtx) -> Result<ExtrinsicReport, CalibError> {
    if !ctx.vision.capabilities().pose {
        ctx.status.set_message("Extrinsics unavailable");
        return Err(CalibError::PoseUnavailable);
    }

    let result = estimate_and_save(ctx);

    match result {
        Ok(ref r) => ctx.status.set_message(&format!(
            "Extrinsics saved ({} corners, camera height {:.0} mm)",
            r.corners,
            camera_height(&r.pose)
        )),
        Err(ref e) => ctx.status.set_message(&format!("Extrinsics failed: {}", e)),
    }

    result
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn estimate_and_save(ctx: &CalibCtx) -> Result<ExtrinsicReport, CalibError> {
    let calib = CalibrationFile::load(&ctx.calibration_path)
        .map_err(|e| CalibError::MissingIntrinsics(ctx.calibration_path.clone(), e.to_string()))?;

    let k = calib.k_matrix().ok_or_else(|| {
        CalibError::MissingIntrinsics(ctx.calibration_path.clone(), "invalid K".into())
    })?;

    let frame = ctx.rgb_frame()?;

    let detection = ctx
        .vision
        .detect_board(&frame.to_luma8(), &ctx.board)
        .map_err(CalibError::PoseError)?;

    if detection.num_markers() == 0 {
        return Err(CalibError::NoMarkers);
    }
    if detection.num_board_corners() < MIN_BOARD_CORNERS {
        return Err(CalibError::TooFewCorners(detection.num_board_corners()));
    }

    // The pose is estimated on the raw frame, so with K and D
    let pose = ctx
        .vision
        .estimate_board_pose(&detection, &ctx.board, &k, &calib.d)
        .map_err(CalibError::PoseError)?;

    // Detections are run on undistorted stills, so the undistorted intrinsics are saved
    let k_saved = calib.best_k().unwrap_or(k);

    ExtrinsicsFile {
        k: rows(&k_saved),
        r: rows(&pose.r),
        t: vec![pose.t.x, pose.t.y, pose.t.z],
        plane_n: None,
        plane_d: None,
        plane_z0: Some(true),
        note: Some(EXTRINSICS_NOTE.into()),
    }
    .save(&ctx.extrinsics_path)?;

    info!("Extrinsics saved to {:?}", ctx.extrinsics_path);
    ctx.status.publish_preview("extrinsics", &frame);

    if let Err(e) = ctx.transform.load_extrinsics_from(&ctx.extrinsics_path) {
        warn!("Saved extrinsics could not be loaded: {}", e);
    }

    Ok(ExtrinsicReport {
        pose,
        k: k_saved,
        corners: detection.num_board_corners(),
    })
}

/// Height of the camera above the board, the Z of `-R^T t`.
fn camera_height(pose: &BoardPose) -> f64 {
    (-(pose.r.transpose() * pose.t)).z
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::calib::fakes::{detection, fixture, intrinsics, FakeVision};
    use crate::calib::CalibrationSession;
    use crate::eqpt::vision::VisionCaps;
    use approx::assert_relative_eq;

    fn calibrate(f: &crate::calib::fakes::Fixture) {
        let mut s = CalibrationSession::new(4);
        for _ in 0..4 {
            s.click(&f.ctx).unwrap();
        }
    }

    #[test]
    fn test_requires_intrinsics() {
        let f = fixture(FakeVision::full(), 4);

        assert!(matches!(estimate_extrinsics(&f.ctx), Err(CalibError::MissingIntrinsics(..))));
        assert!(!f.ctx.extrinsics_path.exists());
        assert!(f.status.message().0.starts_with("Extrinsics failed"));
    }

    #[test]
    fn test_estimate_and_reload() {
        let f = fixture(FakeVision::full(), 4);
        calibrate(&f);
        assert!(!f.ctx.transform.is_ready());

        let report = estimate_extrinsics(&f.ctx).unwrap();

        // newK was available and is saved
        assert_eq!(report.k, intrinsics().k * 0.9);
        assert_eq!(report.corners, 8);
        assert!(f.ctx.extrinsics_path.exists());

        // Transform picked up the new geometry, principal point is under the camera
        assert!(f.ctx.transform.is_ready());
        let (x, y) = f.ctx.transform.pixel_to_world(32.0, 24.0).unwrap();
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-6);

        assert!(f.status.message().0.contains("camera height 1000 mm"));
    }

    #[test]
    fn test_too_few_corners() {
        let f = fixture(FakeVision::full(), 4);
        calibrate(&f);

        // Next detection only has three corners
        f.vision.queued.lock().unwrap().push(detection(4, 3));
        assert!(matches!(estimate_extrinsics(&f.ctx), Err(CalibError::TooFewCorners(3))));

        f.vision.queued.lock().unwrap().push(detection(0, 0));
        assert!(matches!(estimate_extrinsics(&f.ctx), Err(CalibError::NoMarkers)));

        assert!(!f.ctx.extrinsics_path.exists());
    }

    #[test]
    fn test_pose_failure() {
        let mut vision = FakeVision::new(
            VisionCaps { charuco_solve: true, aruco_solve: true, pose: true },
            detection(6, 8),
        );
        vision.pose = None;
        let f = fixture(vision, 4);
        calibrate(&f);

        assert!(matches!(estimate_extrinsics(&f.ctx), Err(CalibError::PoseError(_))));
        assert!(!f.ctx.extrinsics_path.exists());
    }

    #[test]
    fn test_pose_unavailable() {
        let f = fixture(
            FakeVision::new(
                VisionCaps { charuco_solve: true, aruco_solve: true, pose: false },
                detection(6, 8),
            ),
            4,
        );
        calibrate(&f);

        assert!(matches!(estimate_extrinsics(&f.ctx), Err(CalibError::PoseUnavailable)));
        assert_eq!(f.status.message().0, "Extrinsics unavailable");
        assert!(!f.ctx.extrinsics_path.exists());
        assert!(!f.ctx.transform.is_ready());
    }
}
