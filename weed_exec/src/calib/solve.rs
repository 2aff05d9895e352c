//! Selection of the batch calibration solve

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};

use super::CalibError;
use crate::eqpt::vision::{BoardDetection, BoardGeometry, Intrinsics, VisionCaps, VisionLib};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Minimum number of views with enough board corners for the charuco solve.
pub const MIN_CHARUCO_VIEWS: usize = 4;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The solve paths available from the vision library, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStrategy {
    /// Charuco solve, falling back to the marker-only solve with too few rich views
    CharucoWithFallback,

    CharucoOnly,

    ArucoOnly,

    /// No solve available, calibration cannot be performed
    Unavailable,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SolveStrategy {
    pub fn from_caps(caps: VisionCaps) -> Self {
        match (caps.charuco_solve, caps.aruco_solve) {
            (true, true) => SolveStrategy::CharucoWithFallback,
            (true, false) => SolveStrategy::CharucoOnly,
            (false, true) => SolveStrategy::ArucoOnly,
            (false, false) => SolveStrategy::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        *self != SolveStrategy::Unavailable
    }

    /// Solve the intrinsics from the collected views.
    pub fn solve(
        &self,
        vision: &dyn VisionLib,
        views: &[BoardDetection],
        board: &BoardGeometry,
        img_size: (u32, u32),
    ) -> Result<Intrinsics, CalibError> {
        let rich: Vec<&BoardDetection> = views.iter().filter(|v| v.is_rich()).collect();

        let use_charuco = match self {
            SolveStrategy::Unavailable => return Err(CalibError::Unavailable),
            SolveStrategy::ArucoOnly => false,
            SolveStrategy::CharucoOnly => {
                if rich.len() < MIN_CHARUCO_VIEWS {
                    return Err(CalibError::InsufficientViews {
                        found: rich.len(),
                        needed: MIN_CHARUCO_VIEWS,
                    });
                }
                true
            }
            SolveStrategy::CharucoWithFallback => {
                if rich.len() < MIN_CHARUCO_VIEWS {
                    warn!(
                        "Only {} of {} views have enough board corners, using the marker solve",
                        rich.len(),
                        views.len()
                    );
                }
                rich.len() >= MIN_CHARUCO_VIEWS
            }
        };

        if use_charuco {
            info!("Solving intrinsics from {} charuco views", rich.len());
            return vision
                .calibrate_charuco(&rich, board, img_size)
                .map_err(CalibError::SolveError);
        }

        let with_markers: Vec<&BoardDetection> =
            views.iter().filter(|v| v.num_markers() > 0).collect();
        if with_markers.is_empty() {
            return Err(CalibError::NoMarkerData);
        }

        info!("Solving intrinsics from {} marker views", with_markers.len());
        vision
            .calibrate_aruco(&with_markers, board, img_size)
            .map_err(CalibError::SolveError)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::calib::fakes::{detection, FakeVision};
    use crate::params::BoardParams;
    use std::sync::atomic::Ordering;

    fn board() -> BoardGeometry {
        BoardGeometry::from(&BoardParams::default())
    }

    #[test]
    fn test_from_caps() {
        let caps = |c, a| VisionCaps { charuco_solve: c, aruco_solve: a, pose: false };

        assert_eq!(SolveStrategy::from_caps(caps(true, true)), SolveStrategy::CharucoWithFallback);
        assert_eq!(SolveStrategy::from_caps(caps(true, false)), SolveStrategy::CharucoOnly);
        assert_eq!(SolveStrategy::from_caps(caps(false, true)), SolveStrategy::ArucoOnly);
        assert_eq!(SolveStrategy::from_caps(caps(false, false)), SolveStrategy::Unavailable);
        assert!(!SolveStrategy::Unavailable.is_available());
    }

    #[test]
    fn test_charuco_preferred() {
        let vision = FakeVision::full();
        let views = vec![detection(6, 8), detection(6, 8), detection(6, 8), detection(6, 8)];

        SolveStrategy::CharucoWithFallback.solve(&vision, &views, &board(), (64, 48)).unwrap();

        assert_eq!(vision.charuco_calls.load(Ordering::SeqCst), 1);
        assert_eq!(vision.aruco_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_marker_fallback() {
        let vision = FakeVision::full();

        // Only three rich views, and one view with no markers at all
        let views = vec![
            detection(6, 8), detection(6, 8), detection(6, 8), detection(3, 2), detection(0, 0)
        ];

        SolveStrategy::CharucoWithFallback.solve(&vision, &views, &board(), (64, 48)).unwrap();

        assert_eq!(vision.charuco_calls.load(Ordering::SeqCst), 0);
        assert_eq!(vision.aruco_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_solve_failures() {
        let vision = FakeVision::full();
        let empty = vec![detection(0, 0); 5];

        assert!(matches!(
            SolveStrategy::CharucoWithFallback.solve(&vision, &empty, &board(), (64, 48)),
            Err(CalibError::NoMarkerData)
        ));
        assert!(matches!(
            SolveStrategy::CharucoOnly.solve(&vision, &empty, &board(), (64, 48)),
            Err(CalibError::InsufficientViews { found: 0, needed: 4 })
        ));
        assert!(matches!(
            SolveStrategy::Unavailable.solve(&vision, &empty, &board(), (64, 48)),
            Err(CalibError::Unavailable)
        ));
    }
}
