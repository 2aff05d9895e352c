//! Interactive intrinsic calibration session
//!
//! The operator places the board in view and clicks, each click captures one snapshot. Once
//! the target number of snapshots has been collected the intrinsics are solved and saved, and
//! the session is finished. A finished session rejects further clicks, a new session must be
//! created for another calibration.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use image::GenericImageView;
use log::{info, warn};
use std::path::PathBuf;

use super::{files::CalibrationFile, CalibCtx, CalibError};
use crate::eqpt::vision::{BoardDetection, MIN_BOARD_CORNERS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Snapshots collected towards one calibration.
#[derive(Debug)]
pub struct CalibrationSession {
    target: usize,
    views: Vec<BoardDetection>,
    state: SessionState,
}

/// Result of a successful finalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    pub path: PathBuf,

    /// Units: pixels
    pub reproj_err: f64,

    pub img_size: (u32, u32),
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No snapshot yet
    Idle,

    Collecting { n: usize, target: usize },

    Finalizing,

    /// Solved (or failed to), no more clicks accepted
    Done,
}

/// What a click did.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// A snapshot was recorded
    Collected { n: usize, target: usize },

    /// The last snapshot was recorded and the calibration saved
    Finalized(FinalizeReport),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CalibrationSession {
    pub fn new(target: usize) -> Self {
        Self {
            target: target.max(1),
            views: Vec::new(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    pub fn collected(&self) -> usize {
        self.views.len()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Handle one operator click, capturing a snapshot and finalising once the target is
    /// reached.
    ///
    /// A failed finalisation still finishes the session.
    pub fn click(&mut self, ctx: &CalibCtx) -> Result<ClickOutcome, CalibError> {
        let n = self.capture_snapshot(ctx)?;

        if n < self.target {
            return Ok(ClickOutcome::Collected { n, target: self.target });
        }

        self.finalize(ctx).map(ClickOutcome::Finalized)
    }

    /// Capture one snapshot, returning the number collected so far.
    ///
    /// Whatever the library detects is recorded, a snapshot with too few board corners only
    /// raises a warning.
    pub fn capture_snapshot(&mut self, ctx: &CalibCtx) -> Result<usize, CalibError> {
        match self.state {
            SessionState::Done | SessionState::Finalizing => {
                return Err(CalibError::SessionFinished)
            }
            SessionState::Collecting { n, .. } if n >= self.target => {
                return Err(CalibError::SessionFinished)
            }
            _ => (),
        }

        let frame = ctx.rgb_frame()?;

        let detection = match ctx.vision.detect_board(&frame.to_luma8(), &ctx.board) {
            Ok(d) => d,
            Err(e) => {
                warn!("Board detection failed, recording an empty snapshot: {}", e);
                BoardDetection::default()
            }
        };

        let (n_markers, n_corners) = (detection.num_markers(), detection.num_board_corners());
        if n_corners < MIN_BOARD_CORNERS {
            warn!(
                "Low feature snapshot: {} markers, {} board corners (at least {} recommended)",
                n_markers, n_corners, MIN_BOARD_CORNERS
            );
        }

        self.views.push(detection);
        let n = self.views.len();
        self.state = SessionState::Collecting { n, target: self.target };

        info!("Calibration snapshot {}/{}: {} markers, {} corners", n, self.target, n_markers, n_corners);
        ctx.status.set_message(&format!(
            "Calibration: capture {}/{} ({} markers, {} corners)",
            n, self.target, n_markers, n_corners
        ));
        ctx.status.publish_preview(&format!("capture {}/{}", n, self.target), &frame);

        Ok(n)
    }

    /// Solve and save the calibration, then reload the camera and geometry.
    ///
    /// Nothing is written if the solve fails. The session is finished either way.
    pub fn finalize(&mut self, ctx: &CalibCtx) -> Result<FinalizeReport, CalibError> {
        if self.is_done() {
            return Err(CalibError::SessionFinished);
        }

        self.state = SessionState::Finalizing;
        ctx.status.set_message("Calibration: solving...");

        let result = self.solve_and_save(ctx);
        self.state = SessionState::Done;

        match result {
            Ok(ref r) => ctx.status.set_message(&format!(
                "Calibration saved, reprojection error {:.3} px",
                r.reproj_err
            )),
            Err(ref e) => ctx.status.set_message(&format!("Calibration failed: {}", e)),
        }

        result
    }

    fn solve_and_save(&self, ctx: &CalibCtx) -> Result<FinalizeReport, CalibError> {
        // The working size comes from a fresh frame
        let frame = ctx.rgb_frame()?;
        let img_size = (frame.width(), frame.height());

        let intrinsics = ctx.strategy.solve(&*ctx.vision, &self.views, &ctx.board, img_size)?;

        let (new_k, roi) = ctx
            .vision
            .optimal_new_camera_matrix(&intrinsics, img_size, 0.0)
            .map_err(CalibError::SolveError)?;

        let maps = ctx
            .vision
            .undistort_rectify_maps(&intrinsics, &new_k, img_size)
            .map_err(CalibError::SolveError)?;

        CalibrationFile::new(&intrinsics, &new_k, roi, maps, ctx.board.clone())
            .save(&ctx.calibration_path)?;

        info!(
            "Calibration saved to {:?} ({}x{}, reprojection error {:.3} px)",
            ctx.calibration_path, img_size.0, img_size.1, intrinsics.reproj_err
        );

        if let Err(e) = ctx.camera.reload_calibration() {
            warn!("Camera could not reload the calibration: {}", e);
        }
        ctx.transform.reload();

        Ok(FinalizeReport {
            path: ctx.calibration_path.clone(),
            reproj_err: intrinsics.reproj_err,
            img_size,
        })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
