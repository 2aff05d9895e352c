//! Geometry files
//!
//! Both files are JSON. Matrices are stored as lists of rows.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{CameraGeometry, GeomError, GroundPlane};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A planar homography from undistorted pixels to ground millimeters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomographyFile {
    #[serde(rename = "H")]
    pub h: Vec<Vec<f64>>,
}

/// Camera intrinsics, extrinsics and ground plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtrinsicsFile {
    /// Intrinsic matrix of the undistorted image
    #[serde(rename = "K")]
    pub k: Vec<Vec<f64>>,

    /// World to camera rotation
    #[serde(rename = "R")]
    pub r: Vec<Vec<f64>>,

    /// World to camera translation
    pub t: Vec<f64>,

    /// Normal of the ground plane `n . X + d = 0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plane_n: Option<Vec<f64>>,

    /// Offset of the ground plane `n . X + d = 0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plane_d: Option<f64>,

    /// Ground plane is `Z = 0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plane_z0: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HomographyFile {
    pub fn load(path: &Path) -> Result<Self, GeomError> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), GeomError> {
        write_json(path, self)
    }

    /// Validate and convert to a matrix.
    pub fn matrix(&self) -> Result<Matrix3<f64>, GeomError> {
        matrix3("H", &self.h)
    }
}

impl ExtrinsicsFile {
    pub fn load(path: &Path) -> Result<Self, GeomError> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), GeomError> {
        write_json(path, self)
    }

    /// Ground plane described by the file.
    ///
    /// An explicit normal and offset take priority, anything else is treated as `Z = 0`.
    pub fn plane(&self) -> Result<GroundPlane, GeomError> {
        match (&self.plane_n, self.plane_d) {
            (Some(n), Some(d)) => Ok(GroundPlane::General {
                normal: vector3("plane_n", n)?,
                offset: d,
            }),
            _ => {
                if self.plane_z0 != Some(true) {
                    log::info!("No ground plane in the extrinsics, assuming Z=0");
                }
                Ok(GroundPlane::Z0)
            }
        }
    }

    /// Validate and convert to a camera geometry.
    pub fn geometry(&self) -> Result<CameraGeometry, GeomError> {
        CameraGeometry::new(
            matrix3("K", &self.k)?,
            matrix3("R", &self.r)?,
            vector3("t", &self.t)?,
            self.plane()?,
        )
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a matrix to a list of rows.
pub fn rows(m: &Matrix3<f64>) -> Vec<Vec<f64>> {
    (0..3).map(|i| (0..3).map(|j| m[(i, j)]).collect()).collect()
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, GeomError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| GeomError::ReadError(path.into(), e))?;

    serde_json::from_str(&text).map_err(|e| GeomError::ParseError(path.into(), e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), GeomError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(GeomError::SerialiseError)?;

    util::fs::atomic_write(path, &bytes).map_err(|e| GeomError::WriteError(path.into(), e))
}

fn matrix3(name: &'static str, rows: &[Vec<f64>]) -> Result<Matrix3<f64>, GeomError> {
    if rows.len() != 3 || rows.iter().any(|r| r.len() != 3) {
        return Err(GeomError::InvalidShape {
            name,
            expected: "3x3",
            found: format!("{:?}", rows.iter().map(|r| r.len()).collect::<Vec<_>>()),
        });
    }

    Ok(Matrix3::from_fn(|i, j| rows[i][j]))
}

fn vector3(name: &'static str, v: &[f64]) -> Result<Vector3<f64>, GeomError> {
    if v.len() != 3 {
        return Err(GeomError::InvalidShape {
            name,
            expected: "3 elements",
            found: format!("{} elements", v.len()),
        });
    }

    Ok(Vector3::new(v[0], v[1], v[2]))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
