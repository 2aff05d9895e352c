//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operator commands recieved over the UDP control plane
pub mod tc;

/// Line commands exchanged with the ground microcontroller
pub mod mcu;

/// Network module
pub mod net;

// ------------------------------------------------------------------------------------------------
// REEXPORTS
// ------------------------------------------------------------------------------------------------

pub use tc::Mode;
