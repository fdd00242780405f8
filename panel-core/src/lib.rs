#![no_std]

// Control core for a single display panel.
//
// The crate stays portable across MCU firmware and host tests by avoiding the
// Rust standard library. Hardware is reached through the driver traits in
// `pins`, `power`, `clock`, and `family`; everything else is plain state.

#[macro_use]
mod log;

pub mod bypass;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod family;
pub mod monitor;
pub mod pins;
pub mod power;
pub mod registry;
pub mod state;
pub mod telemetry;

pub use device::PanelDevice;
pub use error::{HardwareError, PanelError};
