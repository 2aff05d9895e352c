//! # Control Server
//!
//! The UDP control plane of the coordinator. Three listeners each bind their own port:
//!
//! - mode channel, a mode name which is passed to the control thread,
//! - joystick channel, free-form commands handled by the [`CommandRouter`],
//! - heartbeat channel, any non-empty datagram feeds the [`HeartbeatMonitor`].
//!
//! A fourth thread polls the heartbeat watchdog. Every datagram is checked against the source
//! allow-list first. Nothing is ever sent back to the operator, malformed or disallowed
//! datagrams are logged and dropped.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod heartbeat;
pub mod router;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{net::AllowList, Mode};
use log::{debug, info, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::mode_ctrl::ControlEvent;
use crate::params::UdpParams;
pub use heartbeat::{Clock, HeartbeatMonitor, SimClock, StreamChange, SystemClock};
pub use router::CommandRouter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Largest datagram accepted on any channel.
const MAX_DATAGRAM_LEN: usize = 1024;

/// Period at which blocked listeners check for shutdown.
const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Pause after an unexpected socket error.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Running control server.
pub struct CtrlServer {
    mode_addr: SocketAddr,
    joystick_addr: SocketAddr,
    heartbeat_addr: SocketAddr,

    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CtrlServerError {
    #[error("Could not bind the {0} channel to {1}:{2}: {3}")]
    BindError(&'static str, String, u16, io::Error),

    #[error("Could not configure the {0} socket: {1}")]
    SocketConfigError(&'static str, io::Error),

    #[error("Could not spawn the {0} thread: {1}")]
    ThreadSpawnError(&'static str, io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CtrlServer {
    /// Bind the three channels and start the listener and watchdog threads.
    ///
    /// Mode requests are posted to `events` so that transitions happen on the control thread.
    pub fn start(
        params: &UdpParams,
        events: Sender<ControlEvent>,
        router: Arc<CommandRouter>,
        monitor: Arc<HeartbeatMonitor>,
    ) -> Result<Self, CtrlServerError> {
        let allow = Arc::new(AllowList::new(&params.allowed_sources));
        if allow.is_empty() {
            warn!("No allowed sources configured, accepting datagrams from any address");
        }

        let mode_socket = bind("mode", &params.bind_ip, params.mode_port)?;
        let joystick_socket = bind("joystick", &params.bind_ip, params.joystick_port)?;
        let heartbeat_socket = bind("heartbeat", &params.bind_ip, params.heartbeat_port)?;

        let mut server = Self {
            mode_addr: local_addr("mode", &mode_socket)?,
            joystick_addr: local_addr("joystick", &joystick_socket)?,
            heartbeat_addr: local_addr("heartbeat", &heartbeat_socket)?,
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        };

        // Mode channel
        let mode_allow = allow.clone();
        let handle = spawn_listener("mode", mode_socket, server.shutdown.clone(), move |p, src| {
            if let Some(mode) = handle_mode_datagram(p, src, &mode_allow) {
                if events.send(ControlEvent::SetMode(mode)).is_err() {
                    warn!("Control thread has stopped, mode request dropped");
                }
            }
        })?;
        server.handles.push(handle);

        // Joystick channel
        let joy_allow = allow.clone();
        let handle = spawn_listener(
            "joystick",
            joystick_socket,
            server.shutdown.clone(),
            move |p, src| {
                handle_joystick_datagram(p, src, &joy_allow, &router);
            },
        )?;
        server.handles.push(handle);

        // Heartbeat channel
        let hb_allow = allow;
        let hb_monitor = monitor.clone();
        let handle = spawn_listener(
            "heartbeat",
            heartbeat_socket,
            server.shutdown.clone(),
            move |p, src| {
                handle_heartbeat_datagram(p, src, &hb_allow, &hb_monitor);
            },
        )?;
        server.handles.push(handle);

        // Watchdog
        let period = Duration::from_secs_f64(params.watchdog_period_s.max(0.01));
        let shutdown = server.shutdown.clone();
        let handle = thread::Builder::new()
            .name("hb_watchdog".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    monitor.tick();
                    sleep_unless(&shutdown, period);
                }
            })
            .map_err(|e| CtrlServerError::ThreadSpawnError("hb_watchdog", e))?;
        server.handles.push(handle);

        info!(
            "Control server listening: mode {}, joystick {}, heartbeat {}",
            server.mode_addr, server.joystick_addr, server.heartbeat_addr
        );

        Ok(server)
    }

    pub fn mode_addr(&self) -> SocketAddr {
        self.mode_addr
    }

    pub fn joystick_addr(&self) -> SocketAddr {
        self.joystick_addr
    }

    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.heartbeat_addr
    }

    /// Stop all threads and wait for them to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("A control server thread panicked");
            }
        }
    }
}

impl Drop for CtrlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Decode a mode channel datagram.
///
/// Returns `None` if the source is not allowed or the payload is not a mode name.
pub fn handle_mode_datagram(payload: &[u8], src: SocketAddr, allow: &AllowList) -> Option<Mode> {
    let text = String::from_utf8_lossy(payload);
    let token = text.trim().to_uppercase();

    if !allow.is_allowed(&src.ip()) {
        warn!("Dropping mode request \"{}\" from disallowed source {}", token, src);
        return None;
    }

    match Mode::from_token(&token) {
        Ok(m) => {
            debug!("Mode request {} from {}", m, src);
            Some(m)
        }
        Err(e) => {
            warn!("Dropping mode request from {}: {}", src, e);
            None
        }
    }
}

/// Pass a joystick channel datagram to the router, returning true if it was acted upon.
pub fn handle_joystick_datagram(
    payload: &[u8],
    src: SocketAddr,
    allow: &AllowList,
    router: &CommandRouter,
) -> bool {
    let text = String::from_utf8_lossy(payload);
    let cmd = text.trim();

    if !allow.is_allowed(&src.ip()) {
        warn!("Dropping command \"{}\" from disallowed source {}", cmd, src);
        return false;
    }

    if cmd.is_empty() {
        return false;
    }

    let acted = router.handle_command(cmd);
    if !acted {
        debug!("Command \"{}\" from {} was not acted upon", cmd, src);
    }
    acted
}

/// Record a heartbeat, returning true if it was accepted.
pub fn handle_heartbeat_datagram(
    payload: &[u8],
    src: SocketAddr,
    allow: &AllowList,
    monitor: &HeartbeatMonitor,
) -> bool {
    if payload.is_empty() {
        return false;
    }

    if !allow.is_allowed(&src.ip()) {
        warn!("Dropping heartbeat from disallowed source {}", src);
        return false;
    }

    monitor.beat();
    true
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn bind(name: &'static str, ip: &str, port: u16) -> Result<UdpSocket, CtrlServerError> {
    let socket = UdpSocket::bind((ip, port))
        .map_err(|e| CtrlServerError::BindError(name, ip.into(), port, e))?;

    socket
        .set_read_timeout(Some(POLL_PERIOD))
        .map_err(|e| CtrlServerError::SocketConfigError(name, e))?;

    Ok(socket)
}

fn local_addr(name: &'static str, socket: &UdpSocket) -> Result<SocketAddr, CtrlServerError> {
    socket
        .local_addr()
        .map_err(|e| CtrlServerError::SocketConfigError(name, e))
}

fn spawn_listener<F>(
    name: &'static str,
    socket: UdpSocket,
    shutdown: Arc<AtomicBool>,
    mut handler: F,
) -> Result<JoinHandle<()>, CtrlServerError>
where
    F: FnMut(&[u8], SocketAddr) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("udp_{}", name))
        .spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM_LEN];

            while !shutdown.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((n, src)) => handler(&buf[..n], src),
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock
                                | io::ErrorKind::TimedOut
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        warn!("Error on the {} channel: {}", name, e);
                        sleep_unless(&shutdown, ERROR_BACKOFF);
                    }
                }
            }

            debug!("{} listener stopped", name);
        })
        .map_err(|e| CtrlServerError::ThreadSpawnError(name, e))
}

/// Sleep for `duration` in short steps, returning early on shutdown.
fn sleep_unless(shutdown: &AtomicBool, duration: Duration) {
    let end = Instant::now() + duration;

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= end {
            break;
        }
        thread::sleep((end - now).min(POLL_PERIOD));
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::eqpt::sim::LogStream;
    use crate::mode_ctrl::{store::RecoveryFile, ModeCtrl};
    use crate::serial_link::fakes::RecordingLink;
    use comms_if::tc::JoystickState;
    use std::sync::mpsc;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_mode_datagram() {
        let allow = AllowList::new(&["10.0.0.0/24"]);

        assert_eq!(
            handle_mode_datagram(b" manual\n", addr("10.0.0.5:4000"), &allow),
            Some(Mode::Manual)
        );
        assert_eq!(
            handle_mode_datagram(b"EXTRINSIK", addr("10.0.0.9:4000"), &allow),
            Some(Mode::Extrinsik)
        );

        // Disallowed source
        assert_eq!(
            handle_mode_datagram(b"MANUAL", addr("192.168.1.5:4000"), &allow),
            None
        );

        // Unknown token
        assert_eq!(
            handle_mode_datagram(b"TURBO", addr("10.0.0.5:4000"), &allow),
            None
        );
        assert_eq!(
            handle_mode_datagram(&[0xff, 0xfe], addr("10.0.0.5:4000"), &allow),
            None
        );
    }

    #[test]
    fn test_joystick_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let link = Arc::new(RecordingLink::default());
        let mode_ctrl = Arc::new(ModeCtrl::new(
            link.clone(),
            Box::new(RecoveryFile::new(dir.path().join("mode.txt"))),
        ));
        mode_ctrl.set_mode(Mode::Manual);
        let (tx, _rx) = mpsc::channel();
        let router = CommandRouter::new(mode_ctrl, link.clone(), tx);
        let allow = AllowList::new(&["10.0.0.1"]);

        assert!(handle_joystick_datagram(
            b"JOYSTICK:X=5,Y=6\n",
            addr("10.0.0.1:1234"),
            &allow,
            &router
        ));
        assert!(!handle_joystick_datagram(
            b"JOYSTICK:X=50,Y=60",
            addr("10.0.0.2:1234"),
            &allow,
            &router
        ));
        assert!(!handle_joystick_datagram(
            b"   ",
            addr("10.0.0.1:1234"),
            &allow,
            &router
        ));

        assert_eq!(router.joystick(), JoystickState { x: 5, y: 6 });
        assert_eq!(link.sent(), vec!["MODE:MANUAL", "JOYSTICK:X=5,Y=6"]);
    }

    #[test]
    fn test_heartbeat_datagram() {
        let clock = Arc::new(SimClock::default());
        let stream = Arc::new(LogStream::default());
        let monitor = HeartbeatMonitor::new(clock, stream.clone(), 5.0);
        let allow = AllowList::new(&["127.0.0.1"]);

        assert!(!handle_heartbeat_datagram(b"", addr("127.0.0.1:1"), &allow, &monitor));
        assert!(!handle_heartbeat_datagram(b"hb", addr("127.0.0.2:1"), &allow, &monitor));
        assert_eq!(monitor.tick(), None);

        assert!(handle_heartbeat_datagram(b"hb", addr("127.0.0.1:1"), &allow, &monitor));
        assert_eq!(monitor.tick(), Some(StreamChange::Started));
        assert!(stream.is_on());
    }
}
