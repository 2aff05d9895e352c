//! # Geometry Transform
//!
//! Converts pixel coordinates of an undistorted image into millimeter coordinates on the ground
//! plane. Two models are supported, a planar homography and a full camera geometry (intrinsics,
//! extrinsics and a ground plane) for ray-plane intersection. The homography takes priority.
//!
//! Conventions:
//! - World frame: X right, Y forward, units of millimeters.
//! - `R`, `t` transform world to camera: `X_cam = R * X_world + t`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod files;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::{Matrix3, Vector3};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use files::{ExtrinsicsFile, HomographyFile};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Values below this are treated as zero when normalising or intersecting.
const DEGENERATE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An immutable set of loaded geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundModel {
    /// Pixel (homogeneous) to ground plane (homogeneous, mm)
    pub homography: Option<Matrix3<f64>>,

    pub camera: Option<CameraGeometry>,
}

/// Intrinsics and extrinsics of the camera plus the ground plane.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraGeometry {
    k: Matrix3<f64>,
    k_inv: Matrix3<f64>,
    r: Matrix3<f64>,
    t: Vector3<f64>,
    plane: GroundPlane,
}

/// The geometry currently in use, shared between threads.
///
/// Loads replace the whole model under a write lock, readers take a snapshot and are never
/// affected by a concurrent reload.
#[derive(Debug)]
pub struct WorldTransform {
    homography_path: PathBuf,
    extrinsics_path: PathBuf,
    model: RwLock<Arc<GroundModel>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The ground plane in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroundPlane {
    /// The plane `Z = 0`
    Z0,

    /// The plane `n . X + d = 0`
    General {
        normal: Vector3<f64>,
        offset: f64,
    },
}

#[derive(Debug, Error)]
pub enum GeomError {
    #[error("Could not read {0:?}: {1}")]
    ReadError(PathBuf, std::io::Error),

    #[error("Could not parse {0:?}: {1}")]
    ParseError(PathBuf, serde_json::Error),

    #[error("Could not serialise the geometry: {0}")]
    SerialiseError(serde_json::Error),

    #[error("Could not write {0:?}: {1}")]
    WriteError(PathBuf, std::io::Error),

    #[error("Expected {name} to be {expected}, found {found}")]
    InvalidShape {
        name: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("The intrinsic matrix is not invertible")]
    SingularIntrinsics,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl GroundModel {
    /// True if at least one of the models is loaded.
    pub fn is_ready(&self) -> bool {
        self.homography.is_some() || self.camera.is_some()
    }

    /// Convert an undistorted pixel coordinate into a ground coordinate in millimeters.
    ///
    /// The homography is used if loaded, a degenerate homography result falls through to the
    /// camera geometry. Returns `None` if neither gives a result.
    pub fn pixel_to_world(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        if let Some(ref h) = self.homography {
            if let Some(p) = apply_homography(h, px, py) {
                return Some(p);
            }
        }

        self.camera.as_ref()?.ray_plane_intersection(px, py)
    }
}

impl CameraGeometry {
    pub fn new(
        k: Matrix3<f64>,
        r: Matrix3<f64>,
        t: Vector3<f64>,
        plane: GroundPlane,
    ) -> Result<Self, GeomError> {
        let k_inv = k.try_inverse().ok_or(GeomError::SingularIntrinsics)?;

        Ok(Self { k, k_inv, r, t, plane })
    }

    pub fn k(&self) -> &Matrix3<f64> {
        &self.k
    }

    pub fn plane(&self) -> GroundPlane {
        self.plane
    }

    /// Position of the camera centre in the world frame, `-R^T t`.
    pub fn centre(&self) -> Vector3<f64> {
        -(self.r.transpose() * self.t)
    }

    /// Intersect the ray through the pixel with the ground plane.
    ///
    /// Returns `None` if the ray is parallel to the plane or the plane is behind the camera.
    pub fn ray_plane_intersection(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        let ray_cam = self.k_inv * Vector3::new(px, py, 1.0);
        let norm = ray_cam.norm();
        if norm < DEGENERATE_EPSILON {
            return None;
        }

        let r_inv = self.r.transpose();
        let c = self.centre();
        let d_world = r_inv * (ray_cam / norm);

        let (num, denom) = match self.plane {
            GroundPlane::Z0 => (-c.z, d_world.z),
            GroundPlane::General { normal, offset } => {
                (-(normal.dot(&c) + offset), normal.dot(&d_world))
            }
        };

        if denom.abs() < DEGENERATE_EPSILON {
            return None;
        }

        let s = num / denom;
        if s <= 0.0 {
            return None;
        }

        let x = c + d_world * s;
        Some((x.x, x.y))
    }
}

impl WorldTransform {
    /// Create a transform with nothing loaded.
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(homography_path: P, extrinsics_path: Q) -> Self {
        Self {
            homography_path: homography_path.into(),
            extrinsics_path: extrinsics_path.into(),
            model: RwLock::new(Arc::new(GroundModel::default())),
        }
    }

    /// Get the current model.
    pub fn snapshot(&self) -> Arc<GroundModel> {
        match self.model.read() {
            Ok(m) => m.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ready()
    }

    /// See [`GroundModel::pixel_to_world`].
    pub fn pixel_to_world(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        self.snapshot().pixel_to_world(px, py)
    }

    pub fn extrinsics_path(&self) -> &Path {
        &self.extrinsics_path
    }

    /// Load the homography from its configured file.
    pub fn load_homography(&self) -> Result<(), GeomError> {
        let path = self.homography_path.clone();
        self.load_homography_from(path)
    }

    /// Load a homography, replacing the current one.
    pub fn load_homography_from<P: AsRef<Path>>(&self, path: P) -> Result<(), GeomError> {
        let h = HomographyFile::load(path.as_ref())?.matrix()?;

        self.replace(|m| m.homography = Some(h));
        info!("Homography loaded from {:?}", path.as_ref());

        Ok(())
    }

    /// Load the camera geometry from its configured file.
    pub fn load_extrinsics(&self) -> Result<(), GeomError> {
        let path = self.extrinsics_path.clone();
        self.load_extrinsics_from(path)
    }

    /// Load a camera geometry, replacing the current one.
    pub fn load_extrinsics_from<P: AsRef<Path>>(&self, path: P) -> Result<(), GeomError> {
        let cam = ExtrinsicsFile::load(path.as_ref())?.geometry()?;

        match cam.plane() {
            GroundPlane::Z0 => info!("Extrinsics loaded from {:?}, ground plane Z=0", path.as_ref()),
            GroundPlane::General { normal, offset } => info!(
                "Extrinsics loaded from {:?}, ground plane n=({:.3}, {:.3}, {:.3}) d={:.3}",
                path.as_ref(), normal.x, normal.y, normal.z, offset
            ),
        }

        self.replace(|m| m.camera = Some(cam));

        Ok(())
    }

    /// Best effort load at startup, the homography is tried first and the extrinsics only if no
    /// homography could be loaded.
    ///
    /// Returns true if either was loaded.
    pub fn try_autoload(&self) -> bool {
        match self.load_homography() {
            Ok(()) => return true,
            Err(e) => debug!("No homography loaded: {}", e),
        }

        match self.load_extrinsics() {
            Ok(()) => true,
            Err(e) => {
                debug!("No extrinsics loaded: {}", e);
                false
            }
        }
    }

    /// Discard the current model and load both files again, best effort.
    ///
    /// Called once new calibration or extrinsics have been saved.
    pub fn reload(&self) -> bool {
        let mut model = GroundModel::default();

        match HomographyFile::load(&self.homography_path).and_then(|f| f.matrix()) {
            Ok(h) => model.homography = Some(h),
            Err(e) => debug!("No homography on reload: {}", e),
        }

        match ExtrinsicsFile::load(&self.extrinsics_path).and_then(|f| f.geometry()) {
            Ok(c) => model.camera = Some(c),
            Err(e) => debug!("No extrinsics on reload: {}", e),
        }

        let ready = model.is_ready();
        self.set_model(model);

        info!("World transform reloaded (ready: {})", ready);
        ready
    }

    fn replace<F: FnOnce(&mut GroundModel)>(&self, f: F) {
        let mut guard = match self.model.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };

        let mut model = (**guard).clone();
        f(&mut model);
        *guard = Arc::new(model);
    }

    fn set_model(&self, model: GroundModel) {
        self.replace(|m| *m = model);
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Apply a homography to a pixel, returning `None` if the homogeneous scale is zero.
pub fn apply_homography(h: &Matrix3<f64>, px: f64, py: f64) -> Option<(f64, f64)> {
    let out = h * Vector3::new(px, py, 1.0);

    if out.z.abs() < DEGENERATE_EPSILON {
        return None;
    }

    Some((out.x / out.z, out.y / out.z))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> Matrix3<f64> {
        Matrix3::new(
            500.0, 0.0, 320.0,
            0.0, 500.0, 240.0,
            0.0, 0.0, 1.0
        )
    }

    /// Camera at height `h` above the ground looking straight down.
    fn downward_camera(h: f64, plane: GroundPlane) -> CameraGeometry {
        let r = Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, -1.0, 0.0,
            0.0, 0.0, -1.0
        );
        // t = -R C with C = (0, 0, h)
        let t = -(r * Vector3::new(0.0, 0.0, h));
        CameraGeometry::new(intrinsics(), r, t, plane).unwrap()
    }

    fn assert_point(p: Option<(f64, f64)>, x: f64, y: f64) {
        let (px, py) = p.expect("expected a world point");
        assert_relative_eq!(px, x, epsilon = 1e-6);
        assert_relative_eq!(py, y, epsilon = 1e-6);
    }

    #[test]
    fn test_homography() {
        let h = Matrix3::new(
            2.0, 0.0, 10.0,
            0.0, 3.0, -5.0,
            0.0, 0.0, 1.0
        );
        assert_point(apply_homography(&h, 1.0, 2.0), 12.0, 1.0);

        // Projective scale is divided out
        let h = Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.01, 0.0, 1.0
        );
        assert_point(apply_homography(&h, 100.0, 50.0), 50.0, 25.0);

        // w = 0
        let h = Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 0.0
        );
        assert_eq!(apply_homography(&h, 100.0, 50.0), None);
    }

    #[test]
    fn test_ray_plane_z0() {
        let cam = downward_camera(1000.0, GroundPlane::Z0);

        let c = cam.centre();
        assert_relative_eq!(c.x, 0.0);
        assert_relative_eq!(c.y, 0.0);
        assert_relative_eq!(c.z, 1000.0);

        // Principal point is directly below the camera
        assert_point(cam.ray_plane_intersection(320.0, 240.0), 0.0, 0.0);

        // Normalised slope (0.2, 0.1), image y points to world -Y
        assert_point(cam.ray_plane_intersection(420.0, 290.0), 200.0, -100.0);
    }

    #[test]
    fn test_ray_plane_identity_rotation() {
        // R = I, camera centre at Z = -h so the ground plane is in front of it
        let h = 800.0;
        let cam = CameraGeometry::new(
            intrinsics(), Matrix3::identity(), Vector3::new(0.0, 0.0, h), GroundPlane::Z0
        ).unwrap();

        assert_point(cam.ray_plane_intersection(320.0, 240.0), 0.0, 0.0);
        assert_point(cam.ray_plane_intersection(420.0, 290.0), 0.2 * h, 0.1 * h);
    }

    #[test]
    fn test_ray_plane_general() {
        // Plane Z = 100, i.e. n = (0, 0, 1), d = -100
        let cam = downward_camera(1000.0, GroundPlane::General {
            normal: Vector3::new(0.0, 0.0, 1.0),
            offset: -100.0,
        });

        assert_point(cam.ray_plane_intersection(420.0, 290.0), 180.0, -90.0);
    }

    #[test]
    fn test_ray_plane_rejections() {
        // Plane behind the camera
        let cam = downward_camera(-500.0, GroundPlane::Z0);
        assert_eq!(cam.ray_plane_intersection(320.0, 240.0), None);

        // Plane parallel to the optical axis
        let cam = downward_camera(1000.0, GroundPlane::General {
            normal: Vector3::new(1.0, 0.0, 0.0),
            offset: 0.0,
        });
        assert_eq!(cam.ray_plane_intersection(320.0, 240.0), None);

        // Singular intrinsics
        assert!(matches!(
            CameraGeometry::new(
                Matrix3::zeros(), Matrix3::identity(), Vector3::zeros(), GroundPlane::Z0
            ),
            Err(GeomError::SingularIntrinsics)
        ));
    }

    #[test]
    fn test_model_priority() {
        let empty = GroundModel::default();
        assert!(!empty.is_ready());
        assert_eq!(empty.pixel_to_world(1.0, 1.0), None);

        let mut model = GroundModel {
            homography: Some(Matrix3::identity() * 2.0),
            camera: Some(downward_camera(1000.0, GroundPlane::Z0)),
        };
        assert!(model.is_ready());

        // Homography wins
        assert_point(model.pixel_to_world(420.0, 290.0), 420.0, 290.0);

        // Degenerate homography falls through to the camera
        model.homography = Some(Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 0.0
        ));
        assert_point(model.pixel_to_world(420.0, 290.0), 200.0, -100.0);
    }

    #[test]
    fn test_transform_load_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let h_path = dir.path().join("homography.json");
        let e_path = dir.path().join("extrinsics.json");

        let transform = WorldTransform::new(&h_path, &e_path);
        assert!(!transform.try_autoload());
        assert!(!transform.is_ready());

        std::fs::write(&e_path, r#"{
            "K": [[500, 0, 320], [0, 500, 240], [0, 0, 1]],
            "R": [[1, 0, 0], [0, -1, 0], [0, 0, -1]],
            "t": [0, 0, 1000]
        }"#).unwrap();

        // No plane given, Z = 0 assumed
        assert!(transform.try_autoload());
        assert_point(transform.pixel_to_world(420.0, 290.0), 200.0, -100.0);

        // A snapshot is unaffected by a later load
        let before = transform.snapshot();

        std::fs::write(&h_path, r#"{"H": [[1, 0, 5], [0, 1, 5], [0, 0, 1]]}"#).unwrap();
        transform.load_homography().unwrap();

        assert_point(transform.pixel_to_world(1.0, 1.0), 6.0, 6.0);
        assert!(before.homography.is_none());

        // Reload drops a homography whose file has gone
        std::fs::remove_file(&h_path).unwrap();
        assert!(transform.reload());
        assert!(transform.snapshot().homography.is_none());
        assert!(transform.snapshot().camera.is_some());
    }
}
