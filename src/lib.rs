//! Host-testable core of biosig-ble.
//!
//! Everything here is pure logic with no hardware access: the
//! overflow-extended timestamp source, both biosignal frame layouts, the
//! notification delivery path and the small sensor/battery helpers. The
//! firmware binary (`src/main.rs`, `embedded` feature) wires these to the
//! RTC, the SoftDevice and the accelerometer.
//!
//! Usage: `cargo test --lib` on the host.
//!
//! With the `defmt` feature the library logs through `defmt`; without it
//! log statements compile to nothing.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod acquisition;
pub mod battery;
pub mod config;
pub mod error;
pub mod frame;
pub mod link;
pub mod timestamp;

pub use error::{BleError, DeliveryError, EncodeError, Error};
pub use frame::{FrameEncoder, FrameFormat, SampleBatch};
pub use link::{ConnHandle, Delivery, NotificationLink, NotifyTransport, TransmitOutcome, TransportEvent};
pub use timestamp::{MonotonicClock, ScaleFactor, TickCounter};
