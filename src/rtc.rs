//! RTC2 as the monotonic timestamp source.
//!
//! RTC1 drives `embassy-time` and RTC0 belongs to the SoftDevice, so the
//! biosignal timestamps run on RTC2: 24-bit counter, overflow and tick
//! events routed to the `RTC2` interrupt.
//!
//! The first tick after start clears the counter and switches the tick
//! event off; from then on only overflows interrupt the CPU.

use biosig_ble::config::{RTC_BIT_WIDTH, RTC_PRESCALER};
use biosig_ble::timestamp::{MonotonicClock, ScaleFactor, TickCounter};
use defmt::info;
use embassy_nrf::interrupt::{InterruptExt, Priority};
use embassy_nrf::{interrupt, pac, peripherals};

/// Register-level handle on the RTC2 counter.
pub struct Rtc2Counter;

impl TickCounter for Rtc2Counter {
    const BIT_WIDTH: u32 = RTC_BIT_WIDTH;

    fn read_raw(&self) -> u32 {
        pac::RTC2.counter().read().counter()
    }
}

const SCALE: ScaleFactor = match ScaleFactor::from_prescaler(RTC_PRESCALER) {
    Ok(scale) => scale,
    Err(_) => panic!("RTC_PRESCALER out of range"),
};

/// Nanoseconds since the first RTC2 tick.
pub static CLOCK: MonotonicClock<Rtc2Counter> = MonotonicClock::new(Rtc2Counter, SCALE);

/// Configure and start RTC2. Taking the peripheral keeps anything else
/// from claiming it.
pub fn start(_rtc: peripherals::RTC2) {
    let rtc = pac::RTC2;
    rtc.tasks_stop().write_value(1);
    rtc.prescaler().write(|w| w.set_prescaler(RTC_PRESCALER as u16));
    rtc.evtenset().write(|w| {
        w.set_ovrflw(true);
        w.set_tick(true);
    });
    rtc.intenset().write(|w| {
        w.set_ovrflw(true);
        w.set_tick(true);
    });

    // SoftDevice owns priorities 0, 1 and 4
    interrupt::RTC2.set_priority(Priority::P3);
    unsafe { interrupt::RTC2.enable() };

    rtc.tasks_start().write_value(1);
    info!("RTC2 started, {} ns/tick", SCALE.ns_per_tick());
}

#[interrupt]
unsafe fn RTC2() {
    let rtc = pac::RTC2;

    if rtc.events_ovrflw().read() != 0 {
        rtc.events_ovrflw().write_value(0);
        CLOCK.on_overflow_event();
    }

    if rtc.events_tick().read() != 0 {
        rtc.events_tick().write_value(0);
        rtc.tasks_clear().write_value(1);
        rtc.intenclr().write(|w| w.set_tick(true));
        rtc.evtenclr().write(|w| w.set_tick(true));
        CLOCK.on_tick_event();
    }
}
