//! Datagram sender to the coordinator's control plane

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{tc::JoystickCmd, Mode};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Payload of every heartbeat.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"HB";

/// Period of the background heartbeat.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Addresses of the three channels.
#[derive(Debug, Clone, Copy)]
pub struct Targets {
    pub mode: SocketAddr,
    pub joystick: SocketAddr,
    pub heartbeat: SocketAddr,
}

pub struct Sender {
    socket: Arc<UdpSocket>,
    targets: Targets,
    heartbeat: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Targets {
    /// Resolve the channel addresses of the coordinator at `host`.
    pub fn resolve(host: &str, mode: u16, joystick: u16, heartbeat: u16) -> io::Result<Self> {
        Ok(Self {
            mode: first_addr(host, mode)?,
            joystick: first_addr(host, joystick)?,
            heartbeat: first_addr(host, heartbeat)?,
        })
    }
}

impl Sender {
    pub fn new(targets: Targets) -> io::Result<Self> {
        let bind_addr = match targets.mode {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        Ok(Self {
            socket: Arc::new(UdpSocket::bind(bind_addr)?),
            targets,
            heartbeat: None,
        })
    }

    pub fn send_mode(&self, mode: Mode) -> io::Result<()> {
        self.socket
            .send_to(mode.as_str().as_bytes(), self.targets.mode)
            .map(|_| ())
    }

    pub fn send_joystick(&self, cmd: &JoystickCmd) -> io::Result<()> {
        self.socket
            .send_to(cmd.to_string().as_bytes(), self.targets.joystick)
            .map(|_| ())
    }

    pub fn send_heartbeat(&self) -> io::Result<()> {
        self.socket
            .send_to(HEARTBEAT_PAYLOAD, self.targets.heartbeat)
            .map(|_| ())
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Start sending a heartbeat once per second in the background.
    pub fn start_heartbeat(&mut self) -> io::Result<()> {
        if self.heartbeat.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let socket = self.socket.clone();
        let target = self.targets.heartbeat;

        let handle = thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    if let Err(e) = socket.send_to(HEARTBEAT_PAYLOAD, target) {
                        eprintln!("Could not send heartbeat: {}", e);
                    }
                    thread::sleep(HEARTBEAT_PERIOD);
                }
            })?;

        self.heartbeat = Some((stop, handle));
        Ok(())
    }

    pub fn stop_heartbeat(&mut self) {
        if let Some((stop, handle)) = self.heartbeat.take() {
            stop.store(true, Ordering::Relaxed);
            handle.join().ok();
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn first_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Could not resolve {}:{}", host, port),
        )
    })
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
