//! Unified error types for biosig-ble.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Startup
    /// The requested tick frequency cannot be produced by the counter.
    InvalidTickFrequency(u32),

    /// RTC prescaler above the 12-bit register range.
    InvalidPrescaler(u32),

    /// Channel count / sample width do not fit the 4-bit header fields.
    InvalidFrameFormat,

    /// Encoding the initial characteristic value failed.
    Encode(EncodeError),

    // BLE
    /// The SoftDevice rejected GATT or advertising setup.
    Ble(BleError),
}

/// Errors raised while serialising a sample batch into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// Destination buffer is smaller than the encoded frame.
    BufferOverflow { needed: usize, capacity: usize },
    /// More samples than the 8-bit total count field can describe.
    TooManySamples(usize),
    /// Sample slice length disagrees with the configured frame shape.
    SampleCountMismatch { expected: usize, actual: usize },
    /// Signed 16-bit samples can only be packed at 2 bytes per channel.
    UnsupportedSampleWidth(u8),
}

/// Failures of a single notification send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeliveryError {
    /// No active link; the frame is skipped.
    NotConnected,
    /// The stack accepted a different length than requested.
    TruncatedWrite { requested: u16, accepted: u16 },
    /// Transmit queue still full after the bounded retry.
    Busy,
    /// Encoded frame exceeds the link's current maximum payload.
    PayloadTooLarge { len: usize, max: usize },
    /// Encoding the frame failed.
    Encode(EncodeError),
    /// Raw error code from the transport.
    Transport(u32),
}

/// BLE bring-up failures on target (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// Advertising could not start or timed out.
    AdvertiseFailed,
    /// GATT server registration failed.
    ServerInitFailed,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<EncodeError> for DeliveryError {
    fn from(e: EncodeError) -> Self {
        DeliveryError::Encode(e)
    }
}
