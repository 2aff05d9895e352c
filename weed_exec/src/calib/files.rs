//! Calibration file
//!
//! A MessagePack archive with named fields, matrices are stored as lists of rows.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::CalibError;
use crate::eqpt::vision::{BoardGeometry, Intrinsics, RemapTables, Roi};
use crate::geom::files::rows;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of an intrinsic calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    /// Intrinsic matrix
    #[serde(rename = "K")]
    pub k: Vec<Vec<f64>>,

    /// Distortion coefficients
    #[serde(rename = "D")]
    pub d: Vec<f64>,

    /// Intrinsic matrix of the undistorted image
    #[serde(rename = "newK")]
    pub new_k: Option<Vec<Vec<f64>>>,

    /// Valid region of the undistorted image
    pub roi: Roi,

    pub map1: Vec<i16>,

    pub map2: Vec<u16>,

    /// Width and height of the calibrated image.
    ///
    /// Units: pixels
    pub img_size: [u32; 2],

    /// Units: pixels
    pub reproj_err: f64,

    pub board: BoardGeometry,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CalibrationFile {
    pub fn new(
        intrinsics: &Intrinsics,
        new_k: &Matrix3<f64>,
        roi: Roi,
        maps: RemapTables,
        board: BoardGeometry,
    ) -> Self {
        Self {
            k: rows(&intrinsics.k),
            d: intrinsics.d.clone(),
            new_k: Some(rows(new_k)),
            roi,
            map1: maps.map1,
            map2: maps.map2,
            img_size: [maps.width, maps.height],
            reproj_err: intrinsics.reproj_err,
            board,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CalibError> {
        let bytes = std::fs::read(path).map_err(|e| CalibError::FileError(path.into(), e))?;

        rmp_serde::from_slice(&bytes).map_err(CalibError::DecodeError)
    }

    pub fn save(&self, path: &Path) -> Result<(), CalibError> {
        let bytes = rmp_serde::to_vec_named(self).map_err(CalibError::EncodeError)?;

        util::fs::atomic_write(path, &bytes).map_err(|e| CalibError::FileError(path.into(), e))
    }

    /// The intrinsic matrix.
    pub fn k_matrix(&self) -> Option<Matrix3<f64>> {
        to_matrix(&self.k)
    }

    /// The intrinsic matrix to use with undistorted images, falling back to `K`.
    pub fn best_k(&self) -> Option<Matrix3<f64>> {
        self.new_k.as_ref().and_then(|m| to_matrix(m)).or_else(|| self.k_matrix())
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn to_matrix(rows: &[Vec<f64>]) -> Option<Matrix3<f64>> {
    if rows.len() != 3 || rows.iter().any(|r| r.len() != 3) {
        return None;
    }
    Some(Matrix3::from_fn(|i, j| rows[i][j]))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::calib::fakes::intrinsics;
    use crate::params::BoardParams;

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib/calibration.msgpack");

        let intr = intrinsics();
        let new_k = intr.k * 0.5;
        let file = CalibrationFile::new(
            &intr,
            &new_k,
            Roi { x: 1, y: 2, width: 3, height: 4 },
            RemapTables { width: 2, height: 1, map1: vec![1, -1, 2, -2], map2: vec![7, 8] },
            BoardGeometry::from(&BoardParams::default()),
        );
        file.save(&path).unwrap();

        let loaded = CalibrationFile::load(&path).unwrap();
        assert_eq!(loaded, file);
        assert_eq!(loaded.img_size, [2, 1]);
        assert_eq!(loaded.k_matrix(), Some(intr.k));
        assert_eq!(loaded.best_k(), Some(new_k));

        let mut no_new = loaded;
        no_new.new_k = None;
        assert_eq!(no_new.best_k(), Some(intr.k));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CalibrationFile::load(&dir.path().join("none.msgpack")),
            Err(CalibError::FileError(..))
        ));
    }
}
