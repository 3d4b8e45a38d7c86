//! Multi-device frame: up to three sensor devices sampled at a common
//! cadence, each with its own start timestamp.
//!
//! Layout (little-endian):
//! ```text
//! Byte 0:       device type
//! Byte 1-4:     sample period (ns, u32)
//! Byte 5-28:    3 × start timestamp (ns since boot, u64), zero if unused
//! Byte 29-31:   3 × per-slot sample count (u8)
//! Byte 32:      total sample count (u8)
//! Byte 33-..:   total × sample (i16)
//! ```

use crate::error::EncodeError;

/// Number of device slots in the header.
pub const SLOT_COUNT: usize = 3;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 1 + 4 + 8 * SLOT_COUNT + SLOT_COUNT + 1;

const SAMPLE_SIZE: usize = 2;

/// Source device of a multi-device frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceType {
    Eeg,
    Emg,
    Accel,
    Other(u8),
}

impl From<u8> for DeviceType {
    fn from(value: u8) -> Self {
        match value {
            0 => DeviceType::Eeg,
            1 => DeviceType::Emg,
            2 => DeviceType::Accel,
            other => DeviceType::Other(other),
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(value: DeviceType) -> Self {
        match value {
            DeviceType::Eeg => 0,
            DeviceType::Emg => 1,
            DeviceType::Accel => 2,
            DeviceType::Other(tag) => tag,
        }
    }
}

/// Per-device slot of the header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot {
    /// Timestamp of the slot's first sample (ns since boot).
    pub timestamp_ns: u64,
    /// Samples contributed by this device.
    pub count: u8,
}

/// Decoded multi-device header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MultiDeviceHeader {
    pub device_type: DeviceType,
    pub sample_period_ns: u32,
    pub slots: [Slot; SLOT_COUNT],
    pub total: u8,
}

/// Encoded size of a frame carrying `total` samples.
pub const fn encoded_len(total: usize) -> usize {
    HEADER_LEN + SAMPLE_SIZE * total
}

/// Largest sample count whose frame fits in `max_payload` bytes.
pub fn max_samples(max_payload: usize) -> usize {
    let fit = max_payload.saturating_sub(HEADER_LEN) / SAMPLE_SIZE;
    fit.min(u8::MAX as usize)
}

/// Serialise a batch into `dst`, returning the bytes written.
///
/// `samples.len()` becomes the total count and must fit in a `u8`.
pub fn encode(
    device_type: DeviceType,
    sample_period_ns: u32,
    slots: &[Slot; SLOT_COUNT],
    samples: &[i16],
    dst: &mut [u8],
) -> Result<usize, EncodeError> {
    let total = u8::try_from(samples.len()).map_err(|_| EncodeError::TooManySamples(samples.len()))?;
    let needed = encoded_len(samples.len());
    if dst.len() < needed {
        return Err(EncodeError::BufferOverflow {
            needed,
            capacity: dst.len(),
        });
    }

    dst[0] = device_type.into();
    dst[1..5].copy_from_slice(&sample_period_ns.to_le_bytes());
    let mut pos = 5;
    for slot in slots {
        dst[pos..pos + 8].copy_from_slice(&slot.timestamp_ns.to_le_bytes());
        pos += 8;
    }
    for slot in slots {
        dst[pos] = slot.count;
        pos += 1;
    }
    dst[pos] = total;
    pos += 1;

    for (chunk, sample) in dst[pos..needed].chunks_exact_mut(SAMPLE_SIZE).zip(samples) {
        chunk.copy_from_slice(&sample.to_le_bytes());
    }
    Ok(needed)
}

/// Borrowed view over a received multi-device frame.
#[derive(Clone, Copy, Debug)]
pub struct MultiDeviceFrame<'a> {
    pub header: MultiDeviceHeader,
    samples: &'a [u8],
}

impl<'a> MultiDeviceFrame<'a> {
    /// Parse a frame. Returns `None` if `data` is shorter than the header
    /// plus the advertised total sample count.
    pub fn decode(data: &'a [u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let mut slots = [Slot::default(); SLOT_COUNT];
        for (i, slot) in slots.iter_mut().enumerate() {
            let at = 5 + 8 * i;
            slot.timestamp_ns = u64::from_le_bytes(data[at..at + 8].try_into().ok()?);
            slot.count = data[5 + 8 * SLOT_COUNT + i];
        }
        let total = data[HEADER_LEN - 1];
        let end = encoded_len(total as usize);
        if data.len() < end {
            return None;
        }
        Some(Self {
            header: MultiDeviceHeader {
                device_type: DeviceType::from(data[0]),
                sample_period_ns: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
                slots,
                total,
            },
            samples: &data[HEADER_LEN..end],
        })
    }

    pub fn len(&self) -> usize {
        self.header.total as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.total == 0
    }

    /// Sample at `index`, if present.
    pub fn sample(&self, index: usize) -> Option<i16> {
        let at = index.checked_mul(SAMPLE_SIZE)?;
        let bytes = self.samples.get(at..at + SAMPLE_SIZE)?;
        Some(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + 'a {
        self.samples
            .chunks_exact(SAMPLE_SIZE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }
}
