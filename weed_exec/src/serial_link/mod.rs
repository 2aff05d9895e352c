//! # Serial Link
//!
//! Owns the link to the ground microcontroller. A background reader thread frames inbound bytes
//! into lines which are retrieved without blocking by [`McuLink::read_line`]. Outbound commands
//! are written with [`McuLink::send`].
//!
//! Losing the transport while the coordinator is running is fatal, without command framing the
//! coordinator would operate blind. The reader thread calls a [`FatalHandler`] which by default
//! logs and terminates the process.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod framer;
pub mod port;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, error, info, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

pub use framer::LineFramer;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Size of the reader thread's read buffer.
const READ_BUF_LEN: usize = 64;

/// Exit code used by the default fatal handler.
const FATAL_EXIT_CODE: i32 = 2;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A line oriented link to the microcontroller.
pub trait McuLink: Send + Sync {
    /// Write `cmd` followed by a line terminator.
    fn send(&self, cmd: &str) -> Result<(), SerialLinkError>;

    /// Return the oldest complete line recieved, or `None` if no line is waiting. Never blocks.
    fn read_line(&self) -> Option<String>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Called by the reader thread when the transport fails.
pub type FatalHandler = Box<dyn Fn(&SerialLinkError) + Send + 'static>;

/// Serial link backed by a reader thread.
pub struct SerialLink {
    writer: Mutex<Box<dyn Write + Send>>,

    lines: Mutex<Receiver<String>>,

    shutdown: Arc<AtomicBool>,

    /// Signalled by the reader thread when it exits
    reader_done: Mutex<Option<Receiver<()>>>,

    reader_handle: Mutex<Option<JoinHandle<()>>>,

    close_timeout: Duration,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SerialLinkError {
    #[error("Could not open the serial port {0}: {1}")]
    OpenError(String, serialport::Error),

    #[error("Could not clone the serial port handle: {0}")]
    CloneError(serialport::Error),

    #[error("Could not spawn the serial reader thread: {0}")]
    ThreadSpawnError(io::Error),

    #[error("Could not write to the serial link: {0}")]
    WriteError(io::Error),

    #[error("Could not read from the serial link: {0}")]
    ReadError(io::Error),

    #[error("The serial link was closed by the remote end")]
    Eof,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SerialLink {
    /// Start a link over an already opened transport.
    ///
    /// `reader` is moved into the reader thread. Its reads should time out periodically
    /// (`ErrorKind::TimedOut` or `ErrorKind::WouldBlock`) so that the thread can observe a
    /// shutdown request.
    pub fn from_transport<R, W>(
        reader: R,
        writer: W,
        close_timeout: Duration,
        on_fatal: FatalHandler,
    ) -> Result<Self, SerialLinkError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (line_tx, line_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let thread_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name("serial_reader".into())
            .spawn(move || {
                reader_thread(reader, line_tx, thread_shutdown, on_fatal);
                done_tx.send(()).ok();
            })
            .map_err(SerialLinkError::ThreadSpawnError)?;

        Ok(Self {
            writer: Mutex::new(Box::new(writer)),
            lines: Mutex::new(line_rx),
            shutdown,
            reader_done: Mutex::new(Some(done_rx)),
            reader_handle: Mutex::new(Some(handle)),
            close_timeout,
        })
    }

    /// Stop the reader thread, waiting at most the close timeout for it to exit.
    ///
    /// Shutdown is best effort, a reader which does not stop in time is detached. The transport
    /// is closed when the link is dropped.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let done = match lock(&self.reader_done).take() {
            Some(d) => d,
            // Already closed
            None => return,
        };

        match done.recv_timeout(self.close_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(h) = lock(&self.reader_handle).take() {
                    if h.join().is_err() {
                        warn!("Serial reader thread panicked");
                    }
                }
                info!("Serial link closed");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Serial reader did not stop within {:.1} s, detaching it",
                    self.close_timeout.as_secs_f64()
                );
            }
        }
    }
}

impl McuLink for SerialLink {
    fn send(&self, cmd: &str) -> Result<(), SerialLinkError> {
        let mut writer = lock(&self.writer);

        writer
            .write_all(format!("{}\n", cmd).as_bytes())
            .and_then(|_| writer.flush())
            .map_err(SerialLinkError::WriteError)?;

        debug!("-> MCU: {}", cmd);
        Ok(())
    }

    fn read_line(&self) -> Option<String> {
        let line = lock(&self.lines).try_recv().ok()?;
        debug!("<- MCU: {}", line);
        Some(line)
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The default fatal handler, logs the error and exits the process.
pub fn exit_on_fatal() -> FatalHandler {
    Box::new(|e| {
        error!("Serial transport failure, the coordinator cannot continue: {}", e);
        std::process::exit(FATAL_EXIT_CODE);
    })
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn reader_thread<R: Read>(
    mut reader: R,
    line_tx: Sender<String>,
    shutdown: Arc<AtomicBool>,
    on_fatal: FatalHandler,
) {
    let mut framer = LineFramer::default();
    let mut buf = [0u8; READ_BUF_LEN];

    while !shutdown.load(Ordering::SeqCst) {
        let err = match reader.read(&mut buf) {
            Ok(0) => SerialLinkError::Eof,
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    // Receiver gone, the link has been dropped
                    if line_tx.send(line).is_err() {
                        return;
                    }
                }
                continue;
            }
            Err(e) => match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => continue,
                _ => SerialLinkError::ReadError(e),
            },
        };

        // A failure while closing is expected
        if !shutdown.load(Ordering::SeqCst) {
            on_fatal(&err);
        }
        break;
    }

    debug!("Serial reader thread exiting");
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// TEST UTILITIES
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    /// Reader fed from a channel, times out when empty and reports EOF once the sender is
    /// dropped.
    struct ChannelReader(Receiver<Vec<u8>>);

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv_timeout(Duration::from_millis(10)) {
                Ok(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Err(RecvTimeoutError::Timeout) => Err(ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => Ok(0),
            }
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn wait_line(link: &SerialLink) -> Option<String> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if let Some(l) = link.read_line() {
                return Some(l);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    fn recording_fatal() -> (FatalHandler, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        (Box::new(move |_| f.store(true, Ordering::SeqCst)), flag)
    }

    #[test]
    fn test_read_and_send() {
        let (tx, rx) = mpsc::channel();
        let out = SharedBuf::default();
        let (fatal, fatal_called) = recording_fatal();

        let link = SerialLink::from_transport(
            ChannelReader(rx), out.clone(), Duration::from_secs(1), fatal
        ).unwrap();

        assert_eq!(link.read_line(), None);

        tx.send(b"GET".to_vec()).unwrap();
        tx.send(b"XY\r\n\nREADY\n".to_vec()).unwrap();

        assert_eq!(wait_line(&link).as_deref(), Some("GETXY"));
        assert_eq!(wait_line(&link).as_deref(), Some("READY"));
        assert_eq!(link.read_line(), None);

        link.send("MODE:AUTO").unwrap();
        link.send("DONE").unwrap();
        assert_eq!(&*out.0.lock().unwrap(), b"MODE:AUTO\nDONE\n");

        link.close();
        assert!(!fatal_called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_transport_loss_is_fatal() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let (fatal, fatal_called) = recording_fatal();

        let _link = SerialLink::from_transport(
            ChannelReader(rx), SharedBuf::default(), Duration::from_secs(1), fatal
        ).unwrap();

        drop(tx);

        let start = Instant::now();
        while !fatal_called.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(fatal_called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_is_bounded() {
        /// A reader which never returns
        struct StuckReader;

        impl Read for StuckReader {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                loop {
                    thread::park();
                }
            }
        }

        let (fatal, fatal_called) = recording_fatal();
        let link = SerialLink::from_transport(
            StuckReader, SharedBuf::default(), Duration::from_millis(50), fatal
        ).unwrap();

        let start = Instant::now();
        link.close();
        assert!(start.elapsed() < Duration::from_secs(1));

        // Second close is a no-op
        link.close();
        assert!(!fatal_called.load(Ordering::SeqCst));
    }
}
