//! Marker and calibration board vision library contract

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use image::GrayImage;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::EqptError;
use crate::params::BoardParams;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Minimum number of interpolated board corners for a view to constrain a solve.
pub const MIN_BOARD_CORNERS: usize = 4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Pixel coordinate
pub type Point2 = [f64; 2];

/// Geometry of the printed board, stored alongside a calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub squares_x: u32,
    pub squares_y: u32,
    pub square_mm: f64,
    pub marker_mm: f64,
    pub dictionary: String,
}

/// What was found on one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardDetection {
    /// Four corners per detected marker
    pub marker_corners: Vec<[Point2; 4]>,

    pub marker_ids: Vec<i32>,

    /// Interpolated chessboard corners
    pub board_corners: Vec<Point2>,

    pub board_ids: Vec<i32>,
}

/// Result of a batch solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Intrinsics {
    pub k: Matrix3<f64>,

    /// Distortion coefficients
    pub d: Vec<f64>,

    /// RMS reprojection error.
    ///
    /// Units: pixels
    pub reproj_err: f64,
}

/// Valid region of an undistorted image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Remap tables of an undistortion, in fixed point form.
///
/// `map1` holds interleaved integer `(x, y)` source positions, `map2` the interpolation table
/// index of each pixel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemapTables {
    pub width: u32,
    pub height: u32,
    pub map1: Vec<i16>,
    pub map2: Vec<u16>,
}

/// Pose of the board in the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardPose {
    pub r: Matrix3<f64>,
    pub t: Vector3<f64>,
}

/// Features of the library in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisionCaps {
    /// Batch solve from interpolated board corners
    pub charuco_solve: bool,

    /// Batch solve from marker corners only
    pub aruco_solve: bool,

    /// Board pose estimation
    pub pose: bool,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// The marker/board detection and camera solving library.
pub trait VisionLib: Send + Sync {
    fn capabilities(&self) -> VisionCaps;

    /// Detect markers and interpolate board corners.
    fn detect_board(
        &self,
        gray: &GrayImage,
        board: &BoardGeometry,
    ) -> Result<BoardDetection, EqptError>;

    fn calibrate_charuco(
        &self,
        views: &[&BoardDetection],
        board: &BoardGeometry,
        img_size: (u32, u32),
    ) -> Result<Intrinsics, EqptError>;

    fn calibrate_aruco(
        &self,
        views: &[&BoardDetection],
        board: &BoardGeometry,
        img_size: (u32, u32),
    ) -> Result<Intrinsics, EqptError>;

    /// Intrinsic matrix of the undistorted image and its valid region, `alpha` of 0 keeps only
    /// valid pixels.
    fn optimal_new_camera_matrix(
        &self,
        intrinsics: &Intrinsics,
        img_size: (u32, u32),
        alpha: f64,
    ) -> Result<(Matrix3<f64>, Roi), EqptError>;

    fn undistort_rectify_maps(
        &self,
        intrinsics: &Intrinsics,
        new_k: &Matrix3<f64>,
        img_size: (u32, u32),
    ) -> Result<RemapTables, EqptError>;

    fn estimate_board_pose(
        &self,
        detection: &BoardDetection,
        board: &BoardGeometry,
        k: &Matrix3<f64>,
        d: &[f64],
    ) -> Result<BoardPose, EqptError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BoardDetection {
    pub fn num_markers(&self) -> usize {
        self.marker_ids.len()
    }

    pub fn num_board_corners(&self) -> usize {
        self.board_ids.len()
    }

    /// True if enough board corners were found for this view to constrain a solve.
    pub fn is_rich(&self) -> bool {
        self.num_board_corners() >= MIN_BOARD_CORNERS
    }
}

impl From<&BoardParams> for BoardGeometry {
    fn from(p: &BoardParams) -> Self {
        Self {
            squares_x: p.squares_x,
            squares_y: p.squares_y,
            square_mm: p.square_mm,
            marker_mm: p.marker_mm,
            dictionary: p.dictionary.clone(),
        }
    }
}
