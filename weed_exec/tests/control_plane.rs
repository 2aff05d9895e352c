//! End to end tests of the UDP control plane, run over the loopback interface.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::Mode;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use weed_lib::{
    calib::{CalibCtx, SolveStrategy},
    ctrl_server::{CommandRouter, CtrlServer, HeartbeatMonitor, SystemClock},
    eqpt::sim::{FrameSaver, LogStream, NoVision, SimCamera},
    geom::WorldTransform,
    mode_ctrl::{store::RecoveryFile, Controller, ModeCtrl},
    params::{BoardParams, EqptParams, UdpParams},
    serial_link::{McuLink, SerialLinkError},
    status::StatusBus,
};

// ---------------------------------------------------------------------------
// TEST UTILITIES
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Wire {
    sent: Mutex<Vec<String>>,
}

impl Wire {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl McuLink for Wire {
    fn send(&self, cmd: &str) -> Result<(), SerialLinkError> {
        self.sent.lock().unwrap().push(cmd.to_string());
        Ok(())
    }

    fn read_line(&self) -> Option<String> {
        None
    }
}

struct Robot {
    _dir: tempfile::TempDir,
    recovery_path: PathBuf,
    training_dir: PathBuf,
    wire: Arc<Wire>,
    mode_ctrl: Arc<ModeCtrl>,
    router: Arc<CommandRouter>,
    stream: Arc<LogStream>,
    status: Arc<StatusBus>,
    server: CtrlServer,
    client: UdpSocket,
}

impl Robot {
    fn start(allowed_sources: Vec<String>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let recovery_path = dir.path().join("state").join("mode.txt");
        let training_dir = dir.path().join("training");

        let wire = Arc::new(Wire::default());
        let status = Arc::new(StatusBus::new());
        let stream = Arc::new(LogStream::default());
        let camera = Arc::new(SimCamera::new(&EqptParams {
            resolution: [32, 24],
            ..Default::default()
        }));

        let calib = CalibCtx {
            camera: camera.clone(),
            vision: Arc::new(NoVision),
            status: status.clone(),
            transform: Arc::new(WorldTransform::new(
                dir.path().join("camera_homography.json"),
                dir.path().join("camera_extrinsics.json"),
            )),
            board: (&BoardParams::default()).into(),
            strategy: SolveStrategy::Unavailable,
            calibration_path: dir.path().join("camera_calibration.msgpack"),
            extrinsics_path: dir.path().join("camera_extrinsics.json"),
            target_snapshots: 20,
        };

        let mode_ctrl = Arc::new(ModeCtrl::new(
            wire.clone(),
            Box::new(RecoveryFile::new(&recovery_path)),
        ));
        let controller = Controller::new(
            mode_ctrl.clone(),
            calib,
            Arc::new(FrameSaver::new(camera, &training_dir)),
        );

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || controller.run(rx));

        let router = Arc::new(CommandRouter::new(mode_ctrl.clone(), wire.clone(), tx.clone()));
        let monitor = Arc::new(HeartbeatMonitor::new(
            Arc::new(SystemClock::new()),
            stream.clone(),
            0.3,
        ));

        let params = UdpParams {
            bind_ip: "127.0.0.1".into(),
            mode_port: 0,
            joystick_port: 0,
            heartbeat_port: 0,
            heartbeat_timeout_s: 0.3,
            watchdog_period_s: 0.05,
            allowed_sources,
        };
        let server = CtrlServer::start(&params, tx, router.clone(), monitor).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();

        Self {
            _dir: dir,
            recovery_path,
            training_dir,
            wire,
            mode_ctrl,
            router,
            stream,
            status,
            server,
            client,
        }
    }

    fn send(&self, to: SocketAddr, payload: &str) {
        self.client.send_to(payload.as_bytes(), to).unwrap();
    }
}

/// Poll `cond` until it holds or two seconds have passed.
fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let end = Instant::now() + Duration::from_secs(2);
    while Instant::now() < end {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[test]
fn test_mode_channel_drives_transitions() {
    let robot = Robot::start(vec!["127.0.0.1".into()]);

    robot.send(robot.server.mode_addr(), "manual\n");
    assert!(wait_for(|| robot.mode_ctrl.mode() == Mode::Manual));
    assert_eq!(
        std::fs::read_to_string(&robot.recovery_path).unwrap().trim(),
        "MANUAL"
    );

    // Unknown tokens are dropped
    robot.send(robot.server.mode_addr(), "TURBO");

    robot.send(robot.server.mode_addr(), "DISTORTION");
    assert!(wait_for(|| robot.mode_ctrl.mode() == Mode::Distortion));
    assert!(wait_for(|| robot.status.message().0 == "Calibration unavailable"));

    assert_eq!(robot.wire.sent(), vec!["MODE:MANUAL", "MODE:DISTORTION"]);
}

#[test]
fn test_joystick_channel_in_manual() {
    let robot = Robot::start(Vec::new());

    robot.send(robot.server.mode_addr(), "MANUAL");
    assert!(wait_for(|| robot.mode_ctrl.mode() == Mode::Manual));

    robot.send(robot.server.joystick_addr(), "JOYSTICK:X=10,Y=-20,BUTTON:1");
    assert!(wait_for(|| robot.wire.sent().len() == 2));
    assert_eq!(robot.wire.sent()[1], "JOYSTICK:X=10,Y=-20");
    assert_eq!(robot.router.joystick().x, 10);
    assert_eq!(robot.router.joystick().y, -20);

    // The button press captured a training image
    assert!(wait_for(|| std::fs::read_dir(&robot.training_dir)
        .map(|d| d.count() == 1)
        .unwrap_or(false)));
}

#[test]
fn test_disallowed_source_is_ignored() {
    let robot = Robot::start(vec!["10.0.0.0/8".into()]);

    robot.send(robot.server.mode_addr(), "MANUAL");
    robot.send(robot.server.joystick_addr(), "JOYSTICK:X=1,Y=1");
    robot.send(robot.server.heartbeat_addr(), "hb");
    thread::sleep(Duration::from_millis(300));

    assert_eq!(robot.mode_ctrl.mode(), Mode::Auto);
    assert_eq!(robot.router.joystick().x, 0);
    assert!(!robot.stream.is_on());
    assert!(robot.wire.sent().is_empty());
}

#[test]
fn test_heartbeat_gates_stream() {
    let mut robot = Robot::start(Vec::new());

    robot.send(robot.server.heartbeat_addr(), "hb");
    assert!(wait_for(|| robot.stream.is_on()));

    // Silence beyond the timeout stops the stream
    assert!(wait_for(|| !robot.stream.is_on()));

    robot.server.stop();
}
