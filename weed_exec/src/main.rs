//! Main coordinator executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logging and parameters
//!     - Load the world transform and build the collaborators
//!     - Open the serial link to the microcontroller (blocks until the port is present)
//!     - Restore the persisted mode and start the control thread
//!     - Start the UDP control server
//!     - Main loop:
//!         - Answer detection requests while in AUTO
//!         - Archive detection targets and, once per second, a status report
//!
//! Mode changes and button presses recieved over UDP are handled on the control thread, the
//! main loop only ever reads the mode.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use util::{
    archive::Archiver,
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};
use weed_lib::{
    calib::{CalibCtx, SolveStrategy},
    coordinator::Coordinator,
    ctrl_server::{CommandRouter, CtrlServer, HeartbeatMonitor, SystemClock},
    eqpt::{
        detector::TimedDetector,
        sim::{DummyDetector, FrameSaver, LogStream, NoVision, SimCamera},
        vision::VisionLib,
        CameraSource,
    },
    geom::WorldTransform,
    mode_ctrl::{store::RecoveryFile, Controller, ModeCtrl},
    params::WeedExecParams,
    serial_link::{self, McuLink},
    status::{StatusBus, StatusReport},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Period of the status archive.
const STATUS_PERIOD: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("weed_exec", "sessions")
        .wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Weeding Robot Coordinator\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: WeedExecParams =
        util::params::load("weed_exec.toml").wrap_err("Could not load exec params")?;
    params.resolve_paths(&host::get_sw_root().wrap_err("Could not get the software root")?);

    info!("Exec parameters loaded");

    // ---- INITIALISE COLLABORATORS ----

    let status = Arc::new(StatusBus::new());

    let camera: Arc<dyn CameraSource> = Arc::new(SimCamera::new(&params.eqpt));
    let vision: Arc<dyn VisionLib> = Arc::new(NoVision);
    let stream = Arc::new(LogStream::default());
    let training = Arc::new(FrameSaver::new(
        camera.clone(),
        session.session_root.join("training"),
    ));

    let transform = Arc::new(WorldTransform::new(
        params.calib.homography_path(),
        params.calib.extrinsics_path(),
    ));
    if transform.try_autoload() {
        info!("World transform loaded");
    }
    else {
        warn!("No world transform available, pixel coordinates will be sent");
    }

    let strategy = SolveStrategy::from_caps(vision.capabilities());
    info!("Calibration solve strategy: {:?}", strategy);

    let calib = CalibCtx {
        camera: camera.clone(),
        vision,
        status: status.clone(),
        transform: transform.clone(),
        board: (&params.calib.board).into(),
        strategy,
        calibration_path: params.calib.calibration_path(),
        extrinsics_path: params.calib.extrinsics_path(),
        target_snapshots: params.calib.target_snapshots,
    };

    info!("Collaborators initialised");

    // ---- INITIALISE SERIAL LINK ----

    let link: Arc<dyn McuLink> = Arc::new(
        serial_link::port::open_blocking(&params.serial, serial_link::exit_on_fatal())
            .wrap_err("Failed to open the serial link")?,
    );
    info!("Serial link open");

    // ---- INITIALISE MODE CONTROL ----

    let mode_ctrl = Arc::new(ModeCtrl::new(
        link.clone(),
        Box::new(RecoveryFile::new(&params.recovery_file)),
    ));

    let observer_status = status.clone();
    mode_ctrl.add_observer(Box::new(move |m| observer_status.set_mode(m)));

    let mut controller = Controller::new(mode_ctrl.clone(), calib, training);
    let mode = controller.restore();
    info!("Starting in {} mode", mode);

    let (event_tx, event_rx) = mpsc::channel();
    thread::Builder::new()
        .name("control".into())
        .spawn(move || controller.run(event_rx))
        .wrap_err("Failed to spawn the control thread")?;

    // ---- INITIALISE NETWORK ----

    let router = Arc::new(CommandRouter::new(
        mode_ctrl.clone(),
        link.clone(),
        event_tx.clone(),
    ));
    let monitor = Arc::new(HeartbeatMonitor::new(
        Arc::new(SystemClock::new()),
        stream.clone(),
        params.udp.heartbeat_timeout_s,
    ));

    let _ctrl_server = CtrlServer::start(&params.udp, event_tx, router.clone(), monitor.clone())
        .wrap_err("Failed to start the control server")?;

    info!("Network initialisation complete");

    // ---- INITIALISE ARCHIVES ----

    let mut status_arch = if params.archive_status {
        Archiver::from_path(&session, "status.csv").wrap_err("Failed to create status archive")?
    }
    else {
        Archiver::default()
    };
    let mut targets_arch = Archiver::from_path(&session, "targets.csv")
        .wrap_err("Failed to create targets archive")?;

    // ---- MAIN LOOP ----

    let coordinator = Coordinator::new(
        mode_ctrl.clone(),
        link,
        camera,
        TimedDetector::new(
            Arc::new(DummyDetector::new(&params.eqpt)),
            params.auto.detector_timeout(),
        ),
        transform.clone(),
        &params.auto,
    );

    let cycle_period = params.auto.cycle_period();
    let mut last_status = Instant::now();

    info!("Begining main loop\n");

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- DETECTION ----

        if let Some(targets) = coordinator.tick() {
            for t in targets.iter() {
                if let Err(e) = targets_arch.serialise(t) {
                    warn!("Could not archive target: {}", e);
                }
            }
        }

        // ---- STATUS ----

        if params.archive_status && last_status.elapsed() >= STATUS_PERIOD {
            last_status = Instant::now();

            let report = StatusReport::new(
                mode_ctrl.mode(),
                router.joystick(),
                monitor.is_stream_on(),
                transform.is_ready(),
                status.message().0,
            );

            if let Err(e) = status_arch.serialise(&report) {
                warn!("Could not archive status: {}", e);
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => {
                // Detection cycles block on the detector, so overruns are expected there
                debug!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
                );
            }
        }
    }
}
