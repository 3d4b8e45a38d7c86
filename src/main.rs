//! biosig-ble firmware - nRF52840 + S140 biosignal peripheral.
//!
//! Task layout:
//!
//! - `softdevice_task`   - SoftDevice event pump
//! - `peripheral_task`   - advertise / serve GATT / post link events
//! - `acquisition_task`  - accel FIFO watermark -> frame -> notification
//! - `battery_task`      - VDD sample -> Battery Level characteristic
//! - `led_task`, `button_task` - board indication and disconnect/erase

#![no_std]
#![no_main]

mod ble;
mod board;
mod rtc;
mod sensor;

use biosig_ble::acquisition::{
    decode_accel_frames, fifo_needs_flush, observed_rate_millihertz, send_accel_batch, AXES,
};
use biosig_ble::battery::{level_percent, saadc_to_millivolts};
use biosig_ble::config::{
    ACCEL_SAMPLE_PERIOD_NS, BATTERY_MEAS_INTERVAL_MS, BLE_ATT_MTU, BYTES_PER_FRAME, DEVICE_NAME,
    EVENT_QUEUE_DEPTH, FRAME_FORMAT, STARTUP_DELAY_MS, WATERMARK_FRAMES,
};
use biosig_ble::{FrameEncoder, NotificationLink, TransportEvent};
use core::mem;
use defmt::{info, unwrap, warn};
use embassy_futures::select::{select, Either};
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::saadc::{self, ChannelConfig, Saadc, VddInput};
use embassy_nrf::spim::{self, Spim};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::ble::{Server, SoftdeviceTransport};
use crate::rtc::CLOCK;
use crate::sensor::Bmi160;

bind_interrupts!(struct Irqs {
    SPIM3 => spim::InterruptHandler<peripherals::SPI3>;
    SAADC => saadc::InterruptHandler;
});

/// Link events from the BLE task to the delivery link.
static TRANSPORT_EVENTS: Channel<CriticalSectionRawMutex, TransportEvent, EVENT_QUEUE_DEPTH> = Channel::new();

type Link = NotificationLink<'static, CriticalSectionRawMutex, SoftdeviceTransport>;
type Accel = Bmi160<Spim<'static, peripherals::SPI3>, Output<'static>>;

const FIFO_BYTES: usize = WATERMARK_FRAMES * BYTES_PER_FRAME;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("biosig-ble starting");

    // SoftDevice reserves interrupt priorities 0, 1 and 4
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    // let the harvested supply settle before the radio draws current
    Timer::after(Duration::from_millis(STARTUP_DELAY_MS)).await;

    let sd = Softdevice::enable(&softdevice_config());
    static SERVER: StaticCell<Server> = StaticCell::new();
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    let sd: &'static Softdevice = sd;

    let encoder = unwrap!(FrameEncoder::new(FRAME_FORMAT));
    unwrap!(ble::init_server(server, &encoder));
    unwrap!(spawner.spawn(softdevice_task(sd)));

    rtc::start(p.RTC2);
    while !CLOCK.is_started() {
        Timer::after(Duration::from_millis(1)).await;
    }

    let bonder = ble::bonding::bonder();
    unwrap!(spawner.spawn(ble::peripheral_task(sd, server, bonder, TRANSPORT_EVENTS.sender())));

    let led = Output::new(p.P0_13, Level::High, OutputDrive::Standard);
    let button = Input::new(p.P0_11, Pull::Up);
    unwrap!(spawner.spawn(board::led_task(led)));
    unwrap!(spawner.spawn(board::button_task(button, bonder)));

    interrupt::SPIM3.set_priority(Priority::P3);
    interrupt::SAADC.set_priority(Priority::P3);

    let mut spim_config = spim::Config::default();
    spim_config.frequency = spim::Frequency::M8;
    spim_config.mode = spim::MODE_0;
    let spi = Spim::new(p.SPI3, Irqs, p.P0_27, p.P0_25, p.P0_26, spim_config);
    let cs = Output::new(p.P0_24, Level::High, OutputDrive::Standard);
    let mut accel = Bmi160::new(spi, cs);
    unwrap!(accel.init().await);
    let int1 = Input::new(p.P0_23, Pull::Up);

    let link = NotificationLink::new(
        TRANSPORT_EVENTS.receiver(),
        SoftdeviceTransport::new(server),
        encoder,
    );
    unwrap!(spawner.spawn(acquisition_task(accel, int1, link)));

    let adc = Saadc::new(
        p.SAADC,
        Irqs,
        saadc::Config::default(),
        [ChannelConfig::single_ended(VddInput)],
    );
    unwrap!(spawner.spawn(battery_task(adc, server)));

    info!("biosig-ble running");
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: BLE_ATT_MTU }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_STACK as u8),
        }),
        ..Default::default()
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

/// One batch per FIFO watermark interrupt. Link events are applied while
/// waiting so the BLE side never blocks on a full queue.
#[embassy_executor::task]
async fn acquisition_task(mut accel: Accel, mut int1: Input<'static>, mut link: Link) -> ! {
    let mut raw = [0u8; FIFO_BYTES];
    let mut samples = [0i16; WATERMARK_FRAMES * AXES];
    let mut last_read: Option<u64> = None;

    loop {
        let woke = select(int1.wait_for_falling_edge(), link.next_event()).await;
        // an edge that fell while an event was applied leaves the line low
        if matches!(woke, Either::Second(())) && int1.is_high() {
            continue;
        }
        let timestamp = CLOCK.read();
        let elapsed = last_read.map(|prev| timestamp.saturating_sub(prev));
        if let Some(rate) = elapsed.and_then(|ns| observed_rate_millihertz(WATERMARK_FRAMES, ns)) {
            defmt::trace!("accel: {} mHz", rate);
        }
        last_read = Some(timestamp);

        if let Err(e) = accel.read_fifo(&mut raw).await {
            warn!("accel: FIFO read failed: {}", e);
            continue;
        }
        let count = decode_accel_frames(&raw, &mut samples);
        let congested =
            send_accel_batch(&mut link, timestamp, &samples[..count], ACCEL_SAMPLE_PERIOD_NS).await;

        // a late read leaves the FIFO above the watermark, so the edge never repeats
        if congested {
            match accel.fifo_length().await {
                Ok(level) if fifo_needs_flush(level, WATERMARK_FRAMES) => {
                    info!("accel: FIFO at {} bytes, flushing", level);
                    if let Err(e) = accel.flush_fifo().await {
                        warn!("accel: flush failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("accel: FIFO length read failed: {}", e),
            }
        }
    }
}

#[embassy_executor::task]
async fn battery_task(mut adc: Saadc<'static, 1>, server: &'static Server) -> ! {
    adc.calibrate().await;
    loop {
        let mut buf = [0i16; 1];
        adc.sample(&mut buf).await;
        let millivolts = saadc_to_millivolts(buf[0]);
        let level = level_percent(millivolts);
        info!("battery: {} mV, {}%", millivolts, level);
        ble::update_battery_level(server, level);
        Timer::after(Duration::from_millis(BATTERY_MEAS_INTERVAL_MS)).await;
    }
}
