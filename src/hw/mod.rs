//! Hardware adapters behind Cargo features.
//!
//! Thin producers and collaborators only: each adapter translates one
//! platform surface (raw HCI socket, i2c-dev, serial port) into the traits
//! and event channel the core consumes. No protocol logic lives here.

#[cfg(feature = "hci")]
pub mod hci;

#[cfg(feature = "i2c")]
pub mod i2c;

#[cfg(feature = "serial")]
pub mod serial;
