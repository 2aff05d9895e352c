//! Parameters structure for the coordinator executable

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the coordinator, loaded from `weed_exec.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeedExecParams {
    pub serial: SerialParams,

    pub udp: UdpParams,

    pub calib: CalibParams,

    pub auto: AutoParams,

    pub eqpt: EqptParams,

    /// File storing the last selected mode, relative to the software root.
    pub recovery_file: PathBuf,

    /// If true a status report is archived every second.
    pub archive_status: bool,
}

/// Serial link to the ground microcontroller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialParams {
    /// Path to the physical port
    pub port: String,

    /// Path to a virtual port (e.g. one end of a `socat` pair), tried first when
    /// `use_simulated` is set.
    pub simulated_port: String,

    pub use_simulated: bool,

    pub baud_rate: u32,

    /// Delay between attempts to open an absent port.
    ///
    /// Units: seconds
    pub retry_delay_s: f64,

    /// Delay after opening before the link is first used.
    ///
    /// Units: seconds
    pub settle_delay_s: f64,

    /// Timeout of a single blocking read in the reader thread.
    ///
    /// Units: milliseconds
    pub read_timeout_ms: u64,

    /// Maximum wait for the reader thread when closing.
    ///
    /// Units: seconds
    pub close_timeout_s: f64,
}

/// UDP control plane.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpParams {
    pub bind_ip: String,

    pub mode_port: u16,

    pub joystick_port: u16,

    pub heartbeat_port: u16,

    /// The video stream stays on while a heartbeat arrived within this time.
    ///
    /// Units: seconds
    pub heartbeat_timeout_s: f64,

    /// Units: seconds
    pub watchdog_period_s: f64,

    /// Literal addresses and CIDR blocks allowed to send commands, empty allows all.
    pub allowed_sources: Vec<String>,
}

/// Calibration and geometry files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibParams {
    /// Directory holding the calibration files, relative to the software root.
    pub dir: PathBuf,

    pub calibration_file: String,

    pub extrinsics_file: String,

    pub homography_file: String,

    /// Number of snapshots collected before the intrinsics are solved.
    pub target_snapshots: usize,

    pub board: BoardParams,
}

/// Geometry of the printed calibration board.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardParams {
    pub squares_x: u32,

    pub squares_y: u32,

    /// Units: millimeters
    pub square_mm: f64,

    /// Units: millimeters
    pub marker_mm: f64,

    /// Name of the marker dictionary, e.g. `DICT_4X4_50`
    pub dictionary: String,
}

/// Automatic mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoParams {
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Gap between two coordinate commands.
    ///
    /// Units: seconds
    pub xy_send_delay_s: f64,

    /// A detection taking longer than this is treated as empty.
    ///
    /// Units: seconds
    pub detector_timeout_s: f64,

    /// Undistort stills before detection.
    pub undistort_stills: bool,

    /// Send world coordinates when a transform is available, pixels otherwise.
    pub use_world_coords: bool,
}

/// Simulated equipment, used when no hardware backed collaborators are available.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EqptParams {
    /// Image returned by the simulated camera, a blank frame is used if not set.
    pub frame_path: Option<PathBuf>,

    /// Units: pixels
    pub resolution: [u32; 2],

    /// Pixel centres returned by the dummy detector.
    pub dummy_detections: Vec<[f64; 2]>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl WeedExecParams {
    /// Resolve every relative path against the software root.
    pub fn resolve_paths(&mut self, root: &Path) {
        self.recovery_file = util::host::resolve_path(root, self.recovery_file.clone());
        self.calib.dir = util::host::resolve_path(root, self.calib.dir.clone());
        if let Some(ref p) = self.eqpt.frame_path {
            self.eqpt.frame_path = Some(util::host::resolve_path(root, p.clone()));
        }
    }
}

impl SerialParams {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_s.max(0.0))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs_f64(self.settle_delay_s.max(0.0))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.close_timeout_s.max(0.0))
    }
}

impl AutoParams {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_period_s.max(0.0))
    }

    pub fn xy_send_delay(&self) -> Duration {
        Duration::from_secs_f64(self.xy_send_delay_s.max(0.0))
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.detector_timeout_s.max(0.0))
    }
}

impl CalibParams {
    pub fn calibration_path(&self) -> PathBuf {
        self.dir.join(&self.calibration_file)
    }

    pub fn extrinsics_path(&self) -> PathBuf {
        self.dir.join(&self.extrinsics_file)
    }

    pub fn homography_path(&self) -> PathBuf {
        self.dir.join(&self.homography_file)
    }
}

impl Default for WeedExecParams {
    fn default() -> Self {
        Self {
            serial: SerialParams::default(),
            udp: UdpParams::default(),
            calib: CalibParams::default(),
            auto: AutoParams::default(),
            eqpt: EqptParams::default(),
            recovery_file: PathBuf::from("state/mode.txt"),
            archive_status: true,
        }
    }
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port: "/dev/serial0".into(),
            simulated_port: "/tmp/ttyV8".into(),
            use_simulated: false,
            baud_rate: 115200,
            retry_delay_s: 2.0,
            settle_delay_s: 2.0,
            read_timeout_ms: 100,
            close_timeout_s: 1.0,
        }
    }
}

impl Default for UdpParams {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            mode_port: 5005,
            joystick_port: 5006,
            heartbeat_port: 5007,
            heartbeat_timeout_s: 5.0,
            watchdog_period_s: 1.0,
            allowed_sources: Vec::new(),
        }
    }
}

impl Default for CalibParams {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("calib"),
            calibration_file: "camera_calibration.msgpack".into(),
            extrinsics_file: "camera_extrinsics.json".into(),
            homography_file: "camera_homography.json".into(),
            target_snapshots: 20,
            board: BoardParams::default(),
        }
    }
}

impl Default for BoardParams {
    fn default() -> Self {
        Self {
            squares_x: 5,
            squares_y: 7,
            square_mm: 40.0,
            marker_mm: 30.0,
            dictionary: "DICT_4X4_50".into(),
        }
    }
}

impl Default for AutoParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.1,
            xy_send_delay_s: 0.05,
            detector_timeout_s: 10.0,
            undistort_stills: true,
            use_world_coords: true,
        }
    }
}

impl Default for EqptParams {
    fn default() -> Self {
        Self {
            frame_path: None,
            resolution: [640, 480],
            dummy_detections: vec![[100.0, 200.0]],
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_params() {
        let params: WeedExecParams = toml::from_str(
            r#"
            recovery_file = "state/mode.txt"

            [udp]
            mode_port = 6005
            allowed_sources = ["10.0.0.0/24"]

            [calib.board]
            squares_x = 6
            "#
        ).unwrap();

        assert_eq!(params.udp.mode_port, 6005);
        assert_eq!(params.udp.joystick_port, 5006);
        assert_eq!(params.udp.allowed_sources, vec!["10.0.0.0/24".to_string()]);
        assert_eq!(params.calib.board.squares_x, 6);
        assert_eq!(params.calib.board.squares_y, 7);
        assert_eq!(params.serial.baud_rate, 115200);
        assert_eq!(params.calib.target_snapshots, 20);
    }

    #[test]
    fn test_resolve_paths() {
        let mut params: WeedExecParams = toml::from_str(
            "recovery_file = \"state/mode.txt\""
        ).unwrap();
        params.calib.dir = PathBuf::from("/abs/calib");

        params.resolve_paths(Path::new("/opt/weedbot"));

        assert_eq!(params.recovery_file, PathBuf::from("/opt/weedbot/state/mode.txt"));
        assert_eq!(params.calib.dir, PathBuf::from("/abs/calib"));
        assert_eq!(
            params.calib.extrinsics_path(), 
            PathBuf::from("/abs/calib/camera_extrinsics.json")
        );
    }

    #[test]
    fn test_negative_durations_clamped() {
        let params: WeedExecParams = toml::from_str(
            r#"
            recovery_file = "state/mode.txt"

            [auto]
            cycle_period_s = -0.5
            xy_send_delay_s = -1.0
            detector_timeout_s = -3.0

            [serial]
            retry_delay_s = -2.0
            "#
        ).unwrap();

        assert_eq!(params.auto.cycle_period(), Duration::from_secs(0));
        assert_eq!(params.auto.xy_send_delay(), Duration::from_secs(0));
        assert_eq!(params.auto.detector_timeout(), Duration::from_secs(0));
        assert_eq!(params.serial.retry_delay(), Duration::from_secs(0));

        let params: WeedExecParams = toml::from_str(
            "recovery_file = \"state/mode.txt\"\n[auto]\ncycle_period_s = 0.25"
        ).unwrap();
        assert_eq!(params.auto.cycle_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_shipped_params_load() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("params")
            .join("weed_exec.toml");

        let params: WeedExecParams = util::params::load_from_path(path).unwrap();

        assert_eq!(params.udp.heartbeat_port, 5007);
        assert_eq!(params.auto.xy_send_delay_s, 0.05);
        assert!(params.udp.allowed_sources.is_empty());
        assert_eq!(params.eqpt.dummy_detections, vec![[100.0, 200.0]]);
    }
}
