//! Heartbeat watchdog of the operator video stream
//!
//! The stream runs only while an operator client is sending heartbeats. The watchdog is polled
//! periodically, it starts the stream if a heartbeat arrived within the timeout and stops it
//! once the timeout has elapsed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::eqpt::StreamCtrl;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Seconds since an arbitrary fixed epoch.
    fn now_s(&self) -> f64;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Clock backed by `Instant`.
pub struct SystemClock {
    epoch: Instant,
}

/// Manually advanced clock.
#[derive(Default)]
pub struct SimClock {
    now_s: Mutex<f64>,
}

/// Tracks heartbeats and drives the stream.
pub struct HeartbeatMonitor {
    clock: Arc<dyn Clock>,
    stream: Arc<dyn StreamCtrl>,
    timeout_s: f64,
    state: Mutex<WatchdogState>,
}

#[derive(Default)]
struct WatchdogState {
    last_beat_s: Option<f64>,
    stream_on: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A change of the stream made by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChange {
    Started,
    Stopped,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_s(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl SimClock {
    pub fn advance(&self, dt: Duration) {
        *self.now_s.lock().unwrap_or_else(|e| e.into_inner()) += dt.as_secs_f64();
    }
}

impl Clock for SimClock {
    fn now_s(&self) -> f64 {
        *self.now_s.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HeartbeatMonitor {
    pub fn new(clock: Arc<dyn Clock>, stream: Arc<dyn StreamCtrl>, timeout_s: f64) -> Self {
        Self {
            clock,
            stream,
            timeout_s,
            state: Mutex::new(WatchdogState::default()),
        }
    }

    /// Record the arrival of a heartbeat.
    pub fn beat(&self) {
        let now = self.clock.now_s();
        self.lock().last_beat_s = Some(now);
    }

    pub fn is_stream_on(&self) -> bool {
        self.lock().stream_on
    }

    /// Seconds since the last heartbeat, `None` if there never was one.
    pub fn silence_s(&self) -> Option<f64> {
        let last = self.lock().last_beat_s?;
        Some(self.clock.now_s() - last)
    }

    /// One watchdog poll, starting or stopping the stream as needed.
    ///
    /// The stream state only changes if the stream accepted the command, a failed command is
    /// retried on the next poll.
    pub fn tick(&self) -> Option<StreamChange> {
        let alive = match self.silence_s() {
            Some(s) => s < self.timeout_s,
            None => false,
        };

        let stream_on = self.is_stream_on();

        let change = if alive && !stream_on {
            info!("Heartbeat present, starting the video stream");
            match self.stream.start() {
                Ok(()) => StreamChange::Started,
                Err(e) => {
                    warn!("Could not start the video stream: {}", e);
                    return None;
                }
            }
        }
        else if !alive && stream_on {
            warn!("No heartbeat for {:.1} s, stopping the video stream", self.timeout_s);
            match self.stream.stop() {
                Ok(()) => StreamChange::Stopped,
                Err(e) => {
                    warn!("Could not stop the video stream: {}", e);
                    return None;
                }
            }
        }
        else {
            return None;
        };

        self.lock().stream_on = change == StreamChange::Started;
        Some(change)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WatchdogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
