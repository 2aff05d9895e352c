//! Opening the physical (or virtual) serial port

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::mcu::McuCmd;
use log::{info, warn};
use serialport::SerialPort;
use std::path::Path;
use std::thread;

use super::{FatalHandler, McuLink, SerialLink, SerialLinkError};
use crate::params::SerialParams;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Ports to try, in order of preference.
pub fn candidate_ports(params: &SerialParams) -> Vec<&str> {
    let mut ports = Vec::with_capacity(2);
    if params.use_simulated && !params.simulated_port.is_empty() {
        ports.push(params.simulated_port.as_str());
    }
    ports.push(params.port.as_str());
    ports
}

/// Open the link, blocking until one of the candidate ports can be opened.
///
/// Absent ports are polled every `retry_delay_s`. Once open the link is left to settle for
/// `settle_delay_s` and the start token is sent.
pub fn open_blocking(
    params: &SerialParams,
    on_fatal: FatalHandler,
) -> Result<SerialLink, SerialLinkError> {
    let port = loop {
        match try_open_any(params) {
            Some(p) => break p,
            None => {
                warn!(
                    "No serial port available ({:?}), retrying in {:.1} s",
                    candidate_ports(params),
                    params.retry_delay_s
                );
                thread::sleep(params.retry_delay());
            }
        }
    };

    let writer = port.try_clone().map_err(SerialLinkError::CloneError)?;

    let link = SerialLink::from_transport(port, writer, params.close_timeout(), on_fatal)?;

    thread::sleep(params.settle_delay());

    link.send(&McuCmd::Start.to_string())?;

    Ok(link)
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn try_open_any(params: &SerialParams) -> Option<Box<dyn SerialPort>> {
    for path in candidate_ports(params) {
        if !Path::new(path).exists() {
            continue;
        }

        match serialport::new(path, params.baud_rate)
            .timeout(params.read_timeout())
            .open()
        {
            Ok(p) => {
                info!("Opened serial port {} at {} baud", path, params.baud_rate);
                return Some(p);
            }
            Err(e) => warn!("{}", SerialLinkError::OpenError(path.into(), e)),
        }
    }

    None
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_candidate_ports() {
        let mut params = SerialParams::default();
        assert_eq!(candidate_ports(&params), vec!["/dev/serial0"]);

        params.use_simulated = true;
        assert_eq!(candidate_ports(&params), vec!["/tmp/ttyV8", "/dev/serial0"]);

        params.simulated_port.clear();
        assert_eq!(candidate_ports(&params), vec!["/dev/serial0"]);
    }
}
