//! Single-stream frame: a fixed number of interleaved multi-channel
//! sample frames plus a running sequence number.
//!
//! Layout (little-endian):
//! ```text
//! Byte 0-1:   payload length (u16, header + samples)
//! Byte 2:     format byte   (modality | bytes per channel)
//! Byte 3:     channel byte  (channels | sequence overflow nibble)
//! Byte 4-7:   sequence number (u32, first frame = 1)
//! Byte 8-..:  frames × channels × bytes_per_channel raw sample bytes
//! ```

use super::header::{ChannelByte, FormatByte, Modality};
use crate::error::{EncodeError, Error};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 2 + 1 + 1 + 4;

/// Shape of every single-stream frame, fixed at configuration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamLayout {
    frames: u8,
    channels: u8,
    bytes_per_channel: u8,
    modality: Modality,
}

impl StreamLayout {
    /// Channel count and sample width share nibbles with other fields,
    /// so both must be in `1..=15`.
    pub fn new(
        frames: u8,
        channels: u8,
        bytes_per_channel: u8,
        modality: Modality,
    ) -> Result<Self, Error> {
        if frames == 0 || !(1..=15).contains(&channels) || !(1..=15).contains(&bytes_per_channel) {
            return Err(Error::InvalidFrameFormat);
        }
        Ok(Self {
            frames,
            channels,
            bytes_per_channel,
            modality,
        })
    }

    pub fn frames(&self) -> u8 {
        self.frames
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn bytes_per_channel(&self) -> u8 {
        self.bytes_per_channel
    }

    /// Samples (channel values) per frame.
    pub fn sample_count(&self) -> usize {
        self.frames as usize * self.channels as usize
    }

    /// Raw sample bytes per frame.
    pub fn sample_bytes(&self) -> usize {
        self.sample_count() * self.bytes_per_channel as usize
    }

    /// Total encoded size: `2 + 1 + 1 + 4 + frames * channels * bytes_per_channel`.
    pub fn payload_len(&self) -> usize {
        HEADER_LEN + self.sample_bytes()
    }

    fn format_byte(&self) -> FormatByte {
        FormatByte {
            modality: self.modality,
            bytes_per_channel: self.bytes_per_channel,
        }
    }
}

/// Frame sequence number with a 4-bit wrap counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceCounter {
    value: u32,
    overflow: u8,
}

impl SequenceCounter {
    /// Resume from a known sequence value and overflow nibble.
    pub const fn starting_at(value: u32, overflow: u8) -> Self {
        Self {
            value,
            overflow: overflow & 0x0F,
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn overflow(&self) -> u8 {
        self.overflow
    }

    /// Step to the next sequence number. The overflow nibble advances
    /// exactly when the 32-bit value wraps back to zero.
    pub fn advance(&mut self) -> (u32, u8) {
        match self.value.checked_add(1) {
            Some(next) => self.value = next,
            None => {
                self.value = 0;
                self.overflow = (self.overflow + 1) & 0x0F;
                warn!("frame sequence wrapped, overflow nibble {}", self.overflow);
            }
        }
        (self.value, self.overflow)
    }
}

/// Stateful single-stream encoder; owns the sequence counter.
#[derive(Clone, Debug)]
pub struct SingleStreamEncoder {
    layout: StreamLayout,
    sequence: SequenceCounter,
}

impl SingleStreamEncoder {
    pub fn new(layout: StreamLayout) -> Self {
        Self::with_sequence(layout, SequenceCounter::default())
    }

    pub fn with_sequence(layout: StreamLayout, sequence: SequenceCounter) -> Self {
        Self { layout, sequence }
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    pub fn sequence(&self) -> SequenceCounter {
        self.sequence
    }

    /// Encode pre-packed sample bytes (`layout.sample_bytes()` of them).
    ///
    /// Bounds are checked before the sequence number is consumed, so a
    /// rejected call leaves the counter untouched.
    pub fn encode_raw(&mut self, samples: &[u8], dst: &mut [u8]) -> Result<usize, EncodeError> {
        let expected = self.layout.sample_bytes();
        if samples.len() != expected {
            return Err(EncodeError::SampleCountMismatch {
                expected,
                actual: samples.len(),
            });
        }
        let needed = self.layout.payload_len();
        if dst.len() < needed {
            return Err(EncodeError::BufferOverflow {
                needed,
                capacity: dst.len(),
            });
        }

        let (sequence, _) = self.write_header(dst);
        dst[HEADER_LEN..needed].copy_from_slice(samples);
        trace!("single-stream frame seq={} len={}", sequence, needed);
        Ok(needed)
    }

    /// Encode interleaved `i16` samples; requires 2 bytes per channel.
    pub fn encode(&mut self, samples: &[i16], dst: &mut [u8]) -> Result<usize, EncodeError> {
        if self.layout.bytes_per_channel != 2 {
            return Err(EncodeError::UnsupportedSampleWidth(self.layout.bytes_per_channel));
        }
        let expected = self.layout.sample_count();
        if samples.len() != expected {
            return Err(EncodeError::SampleCountMismatch {
                expected,
                actual: samples.len(),
            });
        }
        let needed = self.layout.payload_len();
        if dst.len() < needed {
            return Err(EncodeError::BufferOverflow {
                needed,
                capacity: dst.len(),
            });
        }

        self.write_header(dst);
        for (chunk, sample) in dst[HEADER_LEN..needed].chunks_exact_mut(2).zip(samples) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(needed)
    }

    fn write_header(&mut self, dst: &mut [u8]) -> (u32, u8) {
        let (sequence, overflow) = self.sequence.advance();
        // payload_len <= 8 + 255 * 15 * 15, always fits in u16
        let payload_len = self.layout.payload_len() as u16;
        dst[0..2].copy_from_slice(&payload_len.to_le_bytes());
        dst[2] = self.layout.format_byte().pack();
        dst[3] = ChannelByte {
            channels: self.layout.channels,
            overflow,
        }
        .pack();
        dst[4..8].copy_from_slice(&sequence.to_le_bytes());
        (sequence, overflow)
    }
}

/// Decoded single-stream header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SingleStreamHeader {
    pub payload_len: u16,
    pub format: FormatByte,
    pub channels: ChannelByte,
    pub sequence: u32,
}

impl SingleStreamHeader {
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            payload_len: u16::from_le_bytes([data[0], data[1]]),
            format: FormatByte::unpack(data[2]),
            channels: ChannelByte::unpack(data[3]),
            sequence: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }

    /// Sequence number extended with the overflow nibble.
    pub fn extended_sequence(&self) -> u64 {
        (u64::from(self.channels.overflow) << 32) | u64::from(self.sequence)
    }

    /// Raw sample bytes following the header, bounded by `payload_len`.
    pub fn samples<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(HEADER_LEN..self.payload_len as usize)
    }
}
