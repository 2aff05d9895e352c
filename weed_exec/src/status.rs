//! # Status bus
//!
//! Holds the latest operator-facing status text and the latest preview image. The outer status
//! broadcaster reads from here, operator-facing failures are only ever reported through this
//! channel.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::{tc::JoystickState, Mode};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ColorType, DynamicImage};
use log::{info, warn};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Width of preview images.
///
/// Units: pixels
pub const PREVIEW_WIDTH: u32 = 320;

/// JPEG quality of preview images.
pub const PREVIEW_QUALITY: u8 = 85;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Destination of operator-facing status.
pub trait StatusSink: Send + Sync {
    fn set_message(&self, msg: &str);

    /// Publish a preview of `image` with a caption (e.g. "capture 3/20").
    fn publish_preview(&self, caption: &str, image: &DynamicImage);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Thread-safe latest status.
#[derive(Default)]
pub struct StatusBus {
    inner: Mutex<StatusState>,
}

#[derive(Default)]
struct StatusState {
    message: String,
    updated: Option<DateTime<Utc>>,
    preview: Option<Preview>,
    mode: Mode,
}

/// A downscaled, JPEG encoded preview.
#[derive(Debug, Clone)]
pub struct Preview {
    pub caption: String,

    /// Mode the preview was taken in
    pub mode: Mode,

    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
    pub taken: DateTime<Utc>,
}

/// Snapshot of the coordinator state, archived periodically.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub time_s: f64,
    pub mode: Mode,
    pub joy_x: i8,
    pub joy_y: i8,
    pub stream_on: bool,
    pub world_ready: bool,
    pub status: String,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest message and when it was set.
    pub fn message(&self) -> (String, Option<DateTime<Utc>>) {
        let s = self.lock();
        (s.message.clone(), s.updated)
    }

    pub fn preview(&self) -> Option<Preview> {
        self.lock().preview.clone()
    }

    /// Record the current mode, registered as a mode observer.
    pub fn set_mode(&self, mode: Mode) {
        self.lock().mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StatusSink for StatusBus {
    fn set_message(&self, msg: &str) {
        info!("Status: {}", msg);

        let mut s = self.lock();
        s.message = msg.to_string();
        s.updated = Some(Utc::now());
    }

    fn publish_preview(&self, caption: &str, image: &DynamicImage) {
        // Encode outside of the lock
        let mode = self.mode();
        match encode_preview(image) {
            Ok((width, height, jpeg)) => {
                self.lock().preview = Some(Preview {
                    caption: caption.to_string(),
                    mode,
                    width,
                    height,
                    jpeg,
                    taken: Utc::now(),
                })
            }
            Err(e) => warn!("Could not encode the preview: {}", e),
        }
    }
}

impl StatusReport {
    pub fn new(
        mode: Mode,
        joystick: JoystickState,
        stream_on: bool,
        world_ready: bool,
        status: String,
    ) -> Self {
        Self {
            time_s: util::session::get_elapsed_seconds(),
            mode,
            joy_x: joystick.x,
            joy_y: joystick.y,
            stream_on,
            world_ready,
            status,
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Scale to the preview width and JPEG encode.
fn encode_preview(image: &DynamicImage) -> image::ImageResult<(u32, u32, Vec<u8>)> {
    let rgb = image.to_rgb8();

    let scale = PREVIEW_WIDTH as f64 / rgb.width().max(1) as f64;
    let height = ((rgb.height() as f64 * scale) as u32).max(1);
    let small = image::imageops::resize(&rgb, PREVIEW_WIDTH, height, FilterType::Triangle);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, PREVIEW_QUALITY).encode(
        small.as_raw(),
        small.width(),
        small.height(),
        ColorType::Rgb8,
    )?;

    Ok((small.width(), small.height(), jpeg))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_message() {
        let bus = StatusBus::new();
        assert_eq!(bus.message(), (String::new(), None));

        bus.set_message("Calibration: click to start");
        let (msg, when) = bus.message();
        assert_eq!(msg, "Calibration: click to start");
        assert!(when.is_some());
    }

    #[test]
    fn test_preview() {
        let bus = StatusBus::new();
        bus.set_mode(Mode::Distortion);

        bus.publish_preview("capture 1/20", &DynamicImage::new_rgb8(640, 480));

        let p = bus.preview().unwrap();
        assert_eq!(p.caption, "capture 1/20");
        assert_eq!(p.mode, Mode::Distortion);
        assert_eq!((p.width, p.height), (320, 240));

        // JPEG start of image marker
        assert_eq!(&p.jpeg[..2], &[0xff, 0xd8]);
    }
}
