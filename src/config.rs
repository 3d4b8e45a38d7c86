//! Application-wide constants and compile-time configuration.
//!
//! All hardware pin assignments, timing parameters, and protocol
//! constants live here so they can be tuned in one place.

use crate::frame::FrameFormat;
use crate::frame::{DeviceType, Modality};

// BLE

/// Advertised device name.
pub const DEVICE_NAME: &str = "BioSig_MA";

/// Device Information Service manufacturer string.
pub const MANUFACTURER_NAME: &str = "NeuroLux";

/// Advertising interval (in 0.625 ms units). 300 = 187.5 ms.
pub const BLE_ADV_INTERVAL: u32 = 300;

/// BLE connection interval range (in 1.25 ms units).
/// 6 = 7.5 ms, 48 = 60 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 6;
pub const BLE_CONN_INTERVAL_MAX: u16 = 48;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// ATT MTU we configure the SoftDevice for and grant on exchange.
pub const BLE_ATT_MTU: u16 = 247;

/// Maximum paired centrals kept in the bond table.
pub const MAX_BONDED_PEERS: usize = 4;

// Notification delivery

/// Depth of the ISR → main loop transport event channel.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Idle/event-pump cycles a busy send waits for `TransmitComplete`, or
/// re-polls a transport without completion events, before giving up.
pub const BUSY_WAIT_MAX_IDLE_CYCLES: u32 = 64;

/// Idle step of the on-target transport between busy re-polls (µs).
/// One minimum connection interval.
pub const BUSY_POLL_INTERVAL_US: u64 = 7_500;

/// Log delivery statistics every N frames.
pub const STATS_LOG_EVERY_FRAMES: u32 = 1_000;

// Timestamp source (RTC2)

/// Bit width of the RTC COUNTER register.
pub const RTC_BIT_WIDTH: u32 = 24;

/// Native RTC input clock (LFCLK).
pub const RTC_NATIVE_HZ: u32 = 32_768;

/// RTC prescaler; tick frequency is `RTC_NATIVE_HZ / (RTC_PRESCALER + 1)`.
pub const RTC_PRESCALER: u32 = 0;

/// Timestamps are expressed in nanoseconds.
pub const TIMESTAMP_PRECISION: u64 = 1_000_000_000;

/// Delay before radio bring-up to let a harvested supply ramp (ms).
pub const STARTUP_DELAY_MS: u64 = 2_000;

// Frame format

/// Default multi-device sample period (ns): 128 sps front end.
pub const DEFAULT_SAMPLE_PERIOD_NS: u32 = 7_812_500;

/// Single-stream: frames packed per notification.
pub const SINGLE_STREAM_FRAMES: u8 = 32;

/// Single-stream: interleaved channels per frame.
pub const SINGLE_STREAM_CHANNELS: u8 = 2;

/// Single-stream: bytes per channel sample.
pub const SINGLE_STREAM_BYTES_PER_CHANNEL: u8 = 2;

/// Single-stream: modality tag written to the format byte.
pub const SINGLE_STREAM_MODALITY: Modality = Modality::ExG;

/// Accelerometer batches, one device slot.
pub const ACCEL_FORMAT: FrameFormat = FrameFormat::MultiDevice {
    device_type: DeviceType::Accel,
    sample_period_ns: ACCEL_SAMPLE_PERIOD_NS,
};

/// EEG front end batches.
pub const EXG_FORMAT: FrameFormat = FrameFormat::MultiDevice {
    device_type: DeviceType::Eeg,
    sample_period_ns: DEFAULT_SAMPLE_PERIOD_NS,
};

/// Fixed-shape two-channel stream with sequence numbers.
pub const SINGLE_STREAM_FORMAT: FrameFormat = FrameFormat::SingleStream {
    frames: SINGLE_STREAM_FRAMES,
    channels: SINGLE_STREAM_CHANNELS,
    bytes_per_channel: SINGLE_STREAM_BYTES_PER_CHANNEL,
    modality: SINGLE_STREAM_MODALITY,
};

/// Frame layout this image streams. The acquisition task feeds it
/// accelerometer batches.
pub const FRAME_FORMAT: FrameFormat = ACCEL_FORMAT;

// Accelerometer (BMI160 FIFO, headerless accel-only mode)

/// FIFO watermark in frames; one notification per watermark interrupt.
pub const WATERMARK_FRAMES: usize = 32;

/// Bytes per headerless accel frame (x, y, z as i16).
pub const BYTES_PER_FRAME: usize = 6;

/// Accelerometer output data rate period (ns): 100 Hz.
pub const ACCEL_SAMPLE_PERIOD_NS: u32 = 10_000_000;

// Battery

/// Battery level characteristic refresh interval (ms).
pub const BATTERY_MEAS_INTERVAL_MS: u64 = 30_000;

/// Supply voltage mapped to 0 % / 100 % battery level (mV).
pub const BATTERY_EMPTY_MV: u16 = 2_000;
pub const BATTERY_FULL_MV: u16 = 3_000;

// GPIO pin assignments (nRF52840-DK defaults)
//
// These are logical names; actual `embassy_nrf::peripherals::*` types are
// selected in `main.rs`.  Adjust for your custom PCB.
//
//   Button 1        → P0.11  (press: disconnect, hold: erase bonds)
//   LED 1           → P0.13  (advertising: blink, connected: solid)
//   Sensor SPI SCK  → P0.27
//   Sensor SPI MOSI → P0.26
//   Sensor SPI MISO → P0.25
//   Sensor SPI CS   → P0.24
//   Sensor INT1     → P0.23  (FIFO watermark, active-low)

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

/// Hold time that turns a button press into "erase bonds" (ms).
pub const BUTTON_LONG_PRESS_MS: u64 = 3_000;

/// LED blink half-period while advertising (ms).
pub const LED_ADVERTISING_BLINK_MS: u64 = 500;
