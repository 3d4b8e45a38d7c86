//! Nibble-packed header bytes of the single-stream frame.
//!
//! ```text
//! format byte:  [7:4] modality   [3:0] bytes per channel
//! channel byte: [7:4] channels   [3:0] sequence overflow count (mod 16)
//! ```
//!
//! Packing is explicit shift/mask so the layout does not depend on how a
//! compiler would lay out bitfields.

const NIBBLE: u8 = 0x0F;

/// Pack two 4-bit values into one byte (`hi` in the upper nibble).
/// Bits above the low nibble of either input are discarded.
pub const fn pack_nibbles(hi: u8, lo: u8) -> u8 {
    ((hi & NIBBLE) << 4) | (lo & NIBBLE)
}

/// Split a byte into `(hi, lo)` nibbles.
pub const fn unpack_nibbles(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & NIBBLE)
}

/// Signal modality carried in the upper nibble of the format byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modality {
    /// Electrophysiology (EEG / EMG / ECG front end).
    ExG,
    /// Inertial (accelerometer).
    Accel,
    /// Temperature.
    Temperature,
    /// Any other 4-bit tag.
    Other(u8),
}

impl From<u8> for Modality {
    fn from(value: u8) -> Self {
        match value & NIBBLE {
            0 => Modality::ExG,
            1 => Modality::Accel,
            2 => Modality::Temperature,
            other => Modality::Other(other),
        }
    }
}

impl From<Modality> for u8 {
    fn from(value: Modality) -> Self {
        match value {
            Modality::ExG => 0,
            Modality::Accel => 1,
            Modality::Temperature => 2,
            Modality::Other(tag) => tag & NIBBLE,
        }
    }
}

/// Format byte: modality + bytes per channel sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FormatByte {
    pub modality: Modality,
    pub bytes_per_channel: u8,
}

impl FormatByte {
    pub fn pack(&self) -> u8 {
        pack_nibbles(self.modality.into(), self.bytes_per_channel)
    }

    pub fn unpack(byte: u8) -> Self {
        let (modality, bytes_per_channel) = unpack_nibbles(byte);
        Self {
            modality: Modality::from(modality),
            bytes_per_channel,
        }
    }
}

/// Channel byte: channel count + low nibble of the sequence overflow count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelByte {
    pub channels: u8,
    pub overflow: u8,
}

impl ChannelByte {
    pub fn pack(&self) -> u8 {
        pack_nibbles(self.channels, self.overflow)
    }

    pub fn unpack(byte: u8) -> Self {
        let (channels, overflow) = unpack_nibbles(byte);
        Self { channels, overflow }
    }
}
