//! Monotonic nanosecond timestamps from a wrapping hardware counter.
//!
//! The counter is `W` bits wide and wraps silently; every wrap raises an
//! overflow interrupt which calls [`MonotonicClock::on_overflow_event`].
//! A read combines the overflow count with the live counter value:
//!
//! ```text
//! ticks = (overflows << W) + counter
//! ns    = ticks * ns_per_tick
//! ```
//!
//! The overflow count and the counter are not sampled atomically. A read
//! that straddles a wrap may be off by one tick; readers accept that
//! rather than masking interrupts on every read.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{RTC_NATIVE_HZ, TIMESTAMP_PRECISION};
use crate::error::Error;

/// Largest prescaler the nRF RTC accepts (12-bit register).
pub const MAX_PRESCALER: u32 = 0xFFF;

/// A free-running hardware tick counter.
pub trait TickCounter {
    /// Counter width in bits.
    const BIT_WIDTH: u32;

    /// Current raw counter value. Bits above `BIT_WIDTH` are ignored.
    fn read_raw(&self) -> u32;
}

/// Nanoseconds per counter tick, fixed at configuration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScaleFactor {
    ns_per_tick: u64,
}

impl ScaleFactor {
    /// Scale factor for a counter ticking at `tick_frequency_hz`.
    ///
    /// The frequency must be reachable from the native clock through an
    /// integer prescaler; anything else is a configuration error.
    pub fn configure(tick_frequency_hz: u32) -> Result<Self, Error> {
        if tick_frequency_hz == 0
            || tick_frequency_hz > RTC_NATIVE_HZ
            || RTC_NATIVE_HZ % tick_frequency_hz != 0
        {
            return Err(Error::InvalidTickFrequency(tick_frequency_hz));
        }
        let prescaler = RTC_NATIVE_HZ / tick_frequency_hz - 1;
        if prescaler > MAX_PRESCALER {
            return Err(Error::InvalidTickFrequency(tick_frequency_hz));
        }
        Self::from_prescaler(prescaler)
    }

    /// Scale factor for an RTC running with `prescaler`
    /// (`f = RTC_NATIVE_HZ / (prescaler + 1)`).
    ///
    /// `const` so the firmware can fix the scale at compile time.
    pub const fn from_prescaler(prescaler: u32) -> Result<Self, Error> {
        if prescaler > MAX_PRESCALER {
            return Err(Error::InvalidPrescaler(prescaler));
        }
        let ns_per_tick = (prescaler as u64 + 1) * TIMESTAMP_PRECISION / RTC_NATIVE_HZ as u64;
        Ok(Self { ns_per_tick })
    }

    pub const fn ns_per_tick(&self) -> u64 {
        self.ns_per_tick
    }

    /// Nanoseconds elapsed over `ticks` counter ticks.
    pub const fn ticks_to_ns(&self, ticks: u64) -> u64 {
        ticks.wrapping_mul(self.ns_per_tick)
    }
}

/// Overflow-extended clock over a [`TickCounter`].
///
/// `on_overflow_event` and `on_tick_event` are called from the RTC
/// interrupt; `read` from the main loop. Both sides only touch atomics.
pub struct MonotonicClock<C: TickCounter> {
    counter: C,
    scale: ScaleFactor,
    overflows: AtomicU32,
    started: AtomicBool,
}

impl<C: TickCounter> MonotonicClock<C> {
    /// Create a clock; call before the counter is started.
    pub const fn new(counter: C, scale: ScaleFactor) -> Self {
        Self {
            counter,
            scale,
            overflows: AtomicU32::new(0),
            started: AtomicBool::new(false),
        }
    }

    pub fn scale(&self) -> ScaleFactor {
        self.scale
    }

    /// Record one hardware overflow. Interrupt-safe, never blocks.
    pub fn on_overflow_event(&self) {
        self.overflows.fetch_add(1, Ordering::Release);
    }

    /// First tick after start: counting is synchronised.
    pub fn on_tick_event(&self) {
        if !self.started.swap(true, Ordering::Release) {
            debug!("timestamp source started");
        }
    }

    /// `true` once the first tick has been observed.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Acquire)
    }

    /// Total ticks since start.
    pub fn ticks(&self) -> u64 {
        let overflows = u64::from(self.overflows.load(Ordering::Acquire));
        let mask = (1u64 << C::BIT_WIDTH) - 1;
        let raw = u64::from(self.counter.read_raw()) & mask;
        (overflows << C::BIT_WIDTH) + raw
    }

    /// Nanoseconds since the counter started.
    pub fn read(&self) -> u64 {
        self.scale.ticks_to_ns(self.ticks())
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }
}
