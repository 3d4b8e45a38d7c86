//! Accelerometer FIFO handling (BMI160, headerless accel-only mode).
//!
//! In headerless mode the FIFO is a plain stream of 6-byte frames:
//!
//! ```text
//! Byte 0-1: X (i16, LE)
//! Byte 2-3: Y (i16, LE)
//! Byte 4-5: Z (i16, LE)
//! ```
//!
//! The sensor raises its watermark interrupt once on crossing the level.
//! If a read is delayed (for example by a busy BLE retry) the FIFO keeps
//! filling past the watermark and the edge never comes again, so the
//! reader must flush it.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::BYTES_PER_FRAME;
use crate::error::DeliveryError;
use crate::frame::SampleBatch;
use crate::link::{Delivery, NotificationLink, NotifyTransport};

/// Axes per accelerometer frame.
pub const AXES: usize = 3;

/// Decode whole FIFO frames from `raw` into interleaved `x, y, z` samples.
///
/// Stops at whichever runs out first: complete frames in `raw` or room in
/// `out`. Returns the number of samples written (a multiple of [`AXES`]).
pub fn decode_accel_frames(raw: &[u8], out: &mut [i16]) -> usize {
    let mut written = 0;
    for (frame, dst) in raw
        .chunks_exact(BYTES_PER_FRAME)
        .zip(out.chunks_exact_mut(AXES))
    {
        for (axis, bytes) in dst.iter_mut().zip(frame.chunks_exact(2)) {
            *axis = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        written += AXES;
    }
    written
}

/// FIFO byte count at which the watermark edge has been missed.
///
/// Uses a two-byte margin below the nominal watermark because the
/// counter is read while the sensor may be mid-frame.
pub const fn flush_threshold(watermark_frames: usize) -> usize {
    (watermark_frames * BYTES_PER_FRAME).saturating_sub(2)
}

/// `true` if the FIFO must be flushed to re-arm the watermark interrupt.
pub fn fifo_needs_flush(level_bytes: usize, watermark_frames: usize) -> bool {
    level_bytes >= flush_threshold(watermark_frames)
}

/// Watermark register value (units of 4 bytes) for `frames` FIFO frames.
pub const fn watermark_register(frames: usize) -> u8 {
    let units = frames * BYTES_PER_FRAME / 4;
    if units > u8::MAX as usize {
        u8::MAX
    } else {
        units as u8
    }
}

/// Effective sample rate in mHz for `frames` read `elapsed_ns` apart.
pub fn observed_rate_millihertz(frames: usize, elapsed_ns: u64) -> Option<u64> {
    if elapsed_ns == 0 {
        return None;
    }
    (frames as u64)
        .checked_mul(1_000_000_000_000)
        .map(|scaled| scaled / elapsed_ns)
}

/// Samples for the next frame of a batch: whole accel frames only, no
/// more than the link's `capacity` or the `remaining` samples.
pub fn chunk_samples(capacity: usize, remaining: usize) -> usize {
    capacity.min(remaining) / AXES * AXES
}

/// Timestamp of a frame that starts `frames_before` FIFO frames into a
/// batch stamped `batch_ns`.
pub fn chunk_timestamp(batch_ns: u64, frames_before: usize, sample_period_ns: u32) -> u64 {
    batch_ns.saturating_add(frames_before as u64 * u64::from(sample_period_ns))
}

/// Send one decoded FIFO batch in as many frames as the link needs.
///
/// A frame the stack refuses for size is re-split at the link's lowered
/// limit, so no samples are lost while the limit settles. Returns `true`
/// if the link held the batch up (busy retry) or dropped part of it.
pub async fn send_accel_batch<M: RawMutex, T: NotifyTransport>(
    link: &mut NotificationLink<'_, M, T>,
    timestamp_ns: u64,
    samples: &[i16],
    sample_period_ns: u32,
) -> bool {
    let mut sent = 0;
    let mut congested = false;
    while sent < samples.len() {
        let take = chunk_samples(link.sample_capacity(), samples.len() - sent);
        if take == 0 {
            warn!("accel: link too small for a frame, {} samples dropped", samples.len() - sent);
            return true;
        }
        let stamp = chunk_timestamp(timestamp_ns, sent / AXES, sample_period_ns);
        match link.send_frame(&SampleBatch::new(Some(stamp), &samples[sent..sent + take])).await {
            Ok(Delivery { retried, .. }) => congested |= retried,
            Err(DeliveryError::PayloadTooLarge { len, max }) if link.sample_capacity() < take => {
                debug!("accel: {} byte frame refused, re-splitting at {}", len, max);
                continue;
            }
            Err(DeliveryError::NotConnected) => return true,
            Err(e) => {
                warn!("accel: frame dropped: {}", e);
                congested = true;
            }
        }
        sent += take;
    }
    congested
}
