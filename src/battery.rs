//! Battery level estimation for the Battery Service.
//!
//! Supply voltage is sampled through the SAADC on VDD (internal 0.6 V
//! reference, gain 1/6, 12-bit), giving a 3.6 V full-scale range.

use crate::config::{BATTERY_EMPTY_MV, BATTERY_FULL_MV};

/// Full-scale input in millivolts (0.6 V reference / gain 1/6).
const SAADC_FULL_SCALE_MV: u32 = 3_600;

/// 12-bit conversion.
const SAADC_MAX_COUNT: u32 = 1 << 12;

/// Convert a raw SAADC sample to millivolts. Negative readings (noise
/// around ground) clamp to zero.
pub fn saadc_to_millivolts(raw: i16) -> u16 {
    let counts = raw.max(0) as u32;
    (counts * SAADC_FULL_SCALE_MV / SAADC_MAX_COUNT) as u16
}

/// Map a supply voltage to a 0-100 % battery level.
///
/// Linear between [`BATTERY_EMPTY_MV`] and [`BATTERY_FULL_MV`], clamped at
/// both ends.
pub fn level_percent(millivolts: u16) -> u8 {
    if millivolts <= BATTERY_EMPTY_MV {
        return 0;
    }
    if millivolts >= BATTERY_FULL_MV {
        return 100;
    }
    let span = u32::from(BATTERY_FULL_MV - BATTERY_EMPTY_MV);
    let above = u32::from(millivolts - BATTERY_EMPTY_MV);
    (above * 100 / span) as u8
}
