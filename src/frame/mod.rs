//! Biosignal frame encoding.
//!
//! Two unrelated frame layouts are in use; which one a firmware image
//! speaks is fixed at configuration time through [`FrameFormat`]:
//!
//! - [`multi_device`] - timestamped batches from up to three devices.
//! - [`single_stream`] - fixed-shape interleaved frames with a sequence
//!   number.
//!
//! Every encoded frame is sent as one GATT notification, so it must fit
//! the link's current maximum payload (ATT MTU minus opcode and handle).

pub mod header;
pub mod multi_device;
pub mod single_stream;


pub use header::{ChannelByte, FormatByte, Modality};
pub use multi_device::{DeviceType, MultiDeviceFrame, MultiDeviceHeader, Slot, SLOT_COUNT};
pub use single_stream::{SequenceCounter, SingleStreamEncoder, SingleStreamHeader, StreamLayout};

use crate::config::BLE_ATT_MTU;
use crate::error::{EncodeError, Error};

/// ATT opcode bytes in a Handle Value Notification.
pub const OPCODE_LENGTH: usize = 1;

/// Attribute handle bytes in a Handle Value Notification.
pub const HANDLE_LENGTH: usize = 2;

/// ATT MTU every link starts with before an exchange.
pub const ATT_DEFAULT_MTU: u16 = 23;

/// Largest notification payload at the configured ATT MTU; frame
/// buffers are sized to this.
pub const MAX_PAYLOAD_CAPACITY: usize = max_payload_for_mtu(BLE_ATT_MTU);

/// Notification payload available at a given ATT MTU.
pub const fn max_payload_for_mtu(att_mtu: u16) -> usize {
    (att_mtu as usize).saturating_sub(OPCODE_LENGTH + HANDLE_LENGTH)
}

/// Frame layout selected for a firmware image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFormat {
    MultiDevice {
        device_type: DeviceType,
        sample_period_ns: u32,
    },
    SingleStream {
        frames: u8,
        channels: u8,
        bytes_per_channel: u8,
        modality: Modality,
    },
}

/// One batch of samples handed to the encoder.
///
/// `slots` only matter for the multi-device layout; the single-stream
/// layout ignores them.
#[derive(Clone, Copy, Debug)]
pub struct SampleBatch<'a> {
    pub slots: [Slot; SLOT_COUNT],
    pub samples: &'a [i16],
}

impl<'a> SampleBatch<'a> {
    /// Batch from a single device, optionally timestamped. The first
    /// slot carries the timestamp and the whole sample count.
    pub fn new(timestamp_ns: Option<u64>, samples: &'a [i16]) -> Self {
        let mut slots = [Slot::default(); SLOT_COUNT];
        slots[0] = Slot {
            timestamp_ns: timestamp_ns.unwrap_or(0),
            count: samples.len().min(u8::MAX as usize) as u8,
        };
        Self { slots, samples }
    }

    /// Batch mixing several devices; `slots` describe how `samples`
    /// splits between them.
    pub fn with_slots(slots: [Slot; SLOT_COUNT], samples: &'a [i16]) -> Self {
        Self { slots, samples }
    }
}

/// Stateless multi-device encoder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultiDeviceEncoder {
    pub device_type: DeviceType,
    pub sample_period_ns: u32,
}

/// Encoder for whichever layout was configured.
#[derive(Clone, Debug)]
pub enum FrameEncoder {
    MultiDevice(MultiDeviceEncoder),
    SingleStream(SingleStreamEncoder),
}

impl FrameEncoder {
    pub fn new(format: FrameFormat) -> Result<Self, Error> {
        Ok(match format {
            FrameFormat::MultiDevice {
                device_type,
                sample_period_ns,
            } => FrameEncoder::MultiDevice(MultiDeviceEncoder {
                device_type,
                sample_period_ns,
            }),
            FrameFormat::SingleStream {
                frames,
                channels,
                bytes_per_channel,
                modality,
            } => FrameEncoder::SingleStream(SingleStreamEncoder::new(StreamLayout::new(
                frames,
                channels,
                bytes_per_channel,
                modality,
            )?)),
        })
    }

    /// Size the batch would encode to, without touching encoder state.
    pub fn encoded_len(&self, batch: &SampleBatch<'_>) -> usize {
        match self {
            FrameEncoder::MultiDevice(_) => multi_device::encoded_len(batch.samples.len()),
            FrameEncoder::SingleStream(enc) => enc.layout().payload_len(),
        }
    }

    /// Samples per notification this layout can carry in `max_payload`.
    pub fn sample_capacity(&self, max_payload: usize) -> usize {
        match self {
            FrameEncoder::MultiDevice(_) => multi_device::max_samples(max_payload),
            FrameEncoder::SingleStream(enc) => {
                if enc.layout().payload_len() <= max_payload {
                    enc.layout().sample_count()
                } else {
                    0
                }
            }
        }
    }

    pub fn encode(&mut self, batch: &SampleBatch<'_>, dst: &mut [u8]) -> Result<usize, EncodeError> {
        match self {
            FrameEncoder::MultiDevice(enc) => multi_device::encode(
                enc.device_type,
                enc.sample_period_ns,
                &batch.slots,
                batch.samples,
                dst,
            ),
            FrameEncoder::SingleStream(enc) => enc.encode(batch.samples, dst),
        }
    }

    /// Initial characteristic value: an all-zero frame. Encoded on a copy
    /// so no sequence number is consumed.
    pub fn initial_value(&self, dst: &mut [u8]) -> Result<usize, EncodeError> {
        match self {
            FrameEncoder::MultiDevice(enc) => {
                const ZEROS: [i16; INITIAL_SAMPLES] = [0; INITIAL_SAMPLES];
                let total = (INITIAL_SLOT_COUNT as usize * SLOT_COUNT)
                    .min(multi_device::max_samples(dst.len()));
                // a short buffer shrinks every slot so the counts still sum to the total
                let mut slots = [Slot::default(); SLOT_COUNT];
                for (i, slot) in slots.iter_mut().enumerate() {
                    slot.count = (total / SLOT_COUNT + usize::from(i < total % SLOT_COUNT)) as u8;
                }
                multi_device::encode(
                    enc.device_type,
                    enc.sample_period_ns,
                    &slots,
                    &ZEROS[..total],
                    dst,
                )
            }
            FrameEncoder::SingleStream(enc) => {
                const ZERO_BYTES: [u8; MAX_PAYLOAD_CAPACITY] = [0; MAX_PAYLOAD_CAPACITY];
                let needed = enc.layout().payload_len();
                let zeros = ZERO_BYTES
                    .get(..enc.layout().sample_bytes())
                    .ok_or(EncodeError::BufferOverflow {
                        needed,
                        capacity: MAX_PAYLOAD_CAPACITY,
                    })?;
                enc.clone().encode_raw(zeros, dst)
            }
        }
    }
}

const INITIAL_SLOT_COUNT: u8 = 32;
const INITIAL_SAMPLES: usize = MAX_PAYLOAD_CAPACITY / 2;
