//! Status LED and user button.
//!
//! - LED (active-low): blinks while advertising, solid while connected.
//! - Button (active-low, internal pull-up): a short press drops the
//!   current connection, holding it erases the bond table.
//!
//! Both talk to the BLE task through signals only.

use crate::ble::bonding::Bonder;
use biosig_ble::config::{BUTTON_DEBOUNCE_MS, BUTTON_LONG_PRESS_MS, LED_ADVERTISING_BLINK_MS};
use defmt::{info, Format};
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{Input, Output};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

/// Link state shown on the LED.
#[derive(Clone, Copy, PartialEq, Eq, Format)]
pub enum LinkStatus {
    Idle,
    Advertising,
    Connected,
}

/// Latest link status, published by the BLE task.
pub static LINK_STATUS: Signal<CriticalSectionRawMutex, LinkStatus> = Signal::new();

/// Raised by the button to ask the BLE task to disconnect.
pub static DISCONNECT_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[embassy_executor::task]
pub async fn led_task(mut led: Output<'static>) -> ! {
    let mut status = LinkStatus::Idle;
    loop {
        match status {
            LinkStatus::Advertising => {
                led.toggle();
                let blink = Timer::after(Duration::from_millis(LED_ADVERTISING_BLINK_MS));
                if let Either::First(next) = select(LINK_STATUS.wait(), blink).await {
                    status = next;
                }
            }
            LinkStatus::Connected => {
                led.set_low();
                status = LINK_STATUS.wait().await;
            }
            LinkStatus::Idle => {
                led.set_high();
                status = LINK_STATUS.wait().await;
            }
        }
    }
}

/// Waits for a press, debounces it, then classifies it by how long the
/// button stays down.
#[embassy_executor::task]
pub async fn button_task(mut button: Input<'static>, bonder: &'static Bonder) -> ! {
    loop {
        button.wait_for_falling_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        if button.is_high() {
            continue;
        }

        let hold = Timer::after(Duration::from_millis(BUTTON_LONG_PRESS_MS));
        match select(button.wait_for_rising_edge(), hold).await {
            Either::First(()) => {
                info!("Button: disconnect requested");
                DISCONNECT_REQUEST.signal(());
            }
            Either::Second(()) => {
                info!("Button: erasing bonds");
                bonder.clear();
                button.wait_for_rising_edge().await;
            }
        }
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
    }
}
