//! Fixed-point scales and the module's slice grid.
//!
//! The module divides its band into equal-width slices numbered from 1.
//! Slice `s` covers `[f(s), f(s + 1))` where
//!
//! ```text
//! f(s) = ((s - 1) * SLW + FSF) / FREQ_SCALE      (THz)
//! ```
//!
//! and `SLW`/`FSF` are the slice width and first-slice frequency from the
//! capability record. A channel from slice `a` to slice `b` inclusive
//! therefore starts at `f(a)` and stops at `f(b + 1)`.

use hrocm_core::{Error, Result};

use crate::records::{BandwidthMode, DeviceInfo};

/// Fixed-point frequency units per THz (0.1 MHz resolution).
pub const FREQ_SCALE: f64 = 1e7;

/// Fixed-point units per dB (and per degree Celsius for temperatures).
pub const POWER_SCALE: f64 = 10.0;

/// Fixed-point resolution-bandwidth units per THz (10 MHz resolution).
pub const RBW_SCALE: f64 = 1e5;

/// Peak power reported for channels outside the high-resolution section.
pub const PMIN_CLIP: f64 = -100.0;

/// Convert a fixed-point level to dB.
pub fn power_db(raw: i16) -> f64 {
    f64::from(raw) / POWER_SCALE
}

/// Convert a fixed-point temperature to degrees Celsius.
pub fn temperature_c(raw: i16) -> f64 {
    f64::from(raw) / POWER_SCALE
}

fn to_u16(value: f64, what: &str) -> Result<u16> {
    if !value.is_finite() || !(0.0..=f64::from(u16::MAX)).contains(&value) {
        return Err(Error::InvalidParameter(format!(
            "{what} {value} does not fit the wire encoding"
        )));
    }
    Ok(value as u16)
}

/// Encode a resolution bandwidth in THz.
pub fn encode_rbw(thz: f64) -> Result<u16> {
    to_u16((thz * RBW_SCALE).round(), "resolution bandwidth")
}

pub fn decode_rbw(raw: u16) -> f64 {
    f64::from(raw) / RBW_SCALE
}

/// Slice geometry and limits of one module, taken from its capability
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceGrid {
    first_slice_freq: u32,
    slice_width: u32,
    max_slices: u16,
    max_channels: u16,
    bandwidth_mode: BandwidthMode,
}

impl SliceGrid {
    /// Build a grid, failing if any field the conversions divide by or
    /// bound against is still zero.
    pub fn new(first_slice_freq: u32, slice_width: u32, max_slices: u16) -> Result<Self> {
        if first_slice_freq == 0 || slice_width == 0 || max_slices == 0 {
            return Err(Error::NotInitialized(
                "Could not determine module scan range".into(),
            ));
        }
        Ok(SliceGrid {
            first_slice_freq,
            slice_width,
            max_slices,
            max_channels: u16::MAX,
            bandwidth_mode: BandwidthMode::Threshold,
        })
    }

    pub fn from_device(info: &DeviceInfo) -> Result<Self> {
        let grid = SliceGrid::new(info.first_slice_freq, info.slice_width, info.max_slices)?;
        Ok(SliceGrid {
            max_channels: info.max_channels,
            bandwidth_mode: info.bandwidth_mode,
            ..grid
        })
    }

    pub fn first_slice_freq(&self) -> u32 {
        self.first_slice_freq
    }

    pub fn slice_width(&self) -> u32 {
        self.slice_width
    }

    pub fn max_slices(&self) -> u16 {
        self.max_slices
    }

    pub fn max_channels(&self) -> u16 {
        self.max_channels
    }

    pub fn bandwidth_mode(&self) -> BandwidthMode {
        self.bandwidth_mode
    }

    /// Slice width in THz.
    pub fn slice_width_thz(&self) -> f64 {
        f64::from(self.slice_width) / FREQ_SCALE
    }

    /// Start frequency of slice 1 in THz.
    pub fn first_slice_thz(&self) -> f64 {
        f64::from(self.first_slice_freq) / FREQ_SCALE
    }

    // ---------------------------------------------------------------
    // Slice <-> frequency
    // ---------------------------------------------------------------

    /// Start frequency of `slice` in THz.
    pub fn slice_to_thz(&self, slice: i64) -> f64 {
        ((slice - 1) as f64 * f64::from(self.slice_width) + f64::from(self.first_slice_freq))
            / FREQ_SCALE
    }

    /// Nearest slice boundary at or around `thz`, as the slice that starts
    /// there. The result may fall outside `[1, Smax]`.
    pub fn thz_to_slice(&self, thz: f64) -> i64 {
        let offset = thz * FREQ_SCALE - f64::from(self.first_slice_freq);
        (offset / f64::from(self.slice_width)).round() as i64 + 1
    }

    /// Last slice of a range that stops at `thz`.
    pub fn stop_to_slice(&self, thz: f64) -> i64 {
        self.thz_to_slice(thz) - 1
    }

    /// Stop frequency of a range whose last slice is `slice`.
    pub fn slice_stop_thz(&self, slice: i64) -> f64 {
        self.slice_to_thz(slice + 1)
    }

    /// Reported center of slices `start..=end`: the midpoint of the first
    /// and last slice frequencies. A single slice reports its own `f(s)`.
    pub fn range_center_thz(&self, start: i64, end: i64) -> f64 {
        (self.slice_to_thz(start) + self.slice_to_thz(end)) / 2.0
    }

    /// Returns `true` if `slice` is a valid slice number.
    pub fn contains(&self, slice: i64) -> bool {
        slice >= 1 && slice <= i64::from(self.max_slices)
    }

    /// `slice` as a wire value, if it lies in `[1, Smax]`.
    pub fn checked_slice(&self, slice: i64) -> Option<u16> {
        if self.contains(slice) {
            u16::try_from(slice).ok()
        } else {
            None
        }
    }

    // ---------------------------------------------------------------
    // OSNR plan parameter encodings
    // ---------------------------------------------------------------

    /// Encode a width in THz as a whole number of slices.
    pub fn encode_width(&self, thz: f64) -> Result<u16> {
        to_u16(
            (thz * FREQ_SCALE / f64::from(self.slice_width)).round(),
            "width",
        )
    }

    pub fn decode_width(&self, raw: u16) -> f64 {
        f64::from(raw) * f64::from(self.slice_width) / FREQ_SCALE
    }

    /// Encode a symmetric width in THz as a half-width in slices around a
    /// center slice: `raw` encodes `1 + 2 * raw` slices.
    pub fn encode_half_width(&self, thz: f64) -> Result<u16> {
        to_u16(
            ((thz * FREQ_SCALE / f64::from(self.slice_width) - 1.0) / 2.0).round(),
            "half width",
        )
    }

    pub fn decode_half_width(&self, raw: u16) -> f64 {
        (1.0 + 2.0 * f64::from(raw)) * f64::from(self.slice_width) / FREQ_SCALE
    }

    /// Encode a bandwidth-threshold value for the module's mode.
    ///
    /// In threshold mode the value is a level relative to peak in dB and
    /// must not be positive. In fixed-slice mode it is a bandwidth in THz
    /// and must be positive.
    pub fn encode_bandwidth_threshold(&self, value: f64) -> Result<u16> {
        match self.bandwidth_mode {
            BandwidthMode::Threshold => {
                if value > 0.0 {
                    return Err(Error::InvalidParameter(format!(
                        "bandwidth mode is 'T': threshold must be <= 0 dB, got {value}"
                    )));
                }
                to_u16((-value * POWER_SCALE).round(), "bandwidth threshold")
            }
            _ => {
                if value <= 0.0 {
                    return Err(Error::InvalidParameter(format!(
                        "bandwidth mode is '{}': bandwidth must be > 0 THz, got {value}",
                        self.bandwidth_mode
                    )));
                }
                self.encode_half_width(value)
            }
        }
    }

    pub fn decode_bandwidth_threshold(&self, raw: u16) -> f64 {
        match self.bandwidth_mode {
            BandwidthMode::Threshold => -f64::from(raw) / POWER_SCALE,
            _ => self.decode_half_width(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SliceGrid {
        SliceGrid::new(1_913_125_000, 3125, 15440).unwrap()
    }

    fn fixed_mode_grid() -> SliceGrid {
        SliceGrid {
            bandwidth_mode: BandwidthMode::FixedSlices,
            ..grid()
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn zero_fields_are_not_initialized() {
        assert!(matches!(
            SliceGrid::new(0, 3125, 15440),
            Err(Error::NotInitialized(_))
        ));
        assert!(SliceGrid::new(1_913_125_000, 0, 15440).is_err());
        assert!(SliceGrid::new(1_913_125_000, 3125, 0).is_err());
    }

    #[test]
    fn first_and_last_slice_frequencies() {
        let g = grid();
        assert!(close(g.slice_to_thz(1), 191.3125));
        let last = (3125.0 * 15439.0 + 1_913_125_000.0) / FREQ_SCALE;
        assert!(close(g.slice_to_thz(15440), last));
    }

    #[test]
    fn frequency_round_trip_within_one_slice() {
        let g = grid();
        let width = g.slice_width_thz();
        let mut f = g.first_slice_thz();
        let top = g.slice_to_thz(15440);
        while f <= top {
            let back = g.slice_to_thz(g.thz_to_slice(f));
            assert!((back - f).abs() <= width, "f={f} back={back}");
            f += 0.0137;
        }
    }

    #[test]
    fn slice_round_trip_is_exact() {
        let g = grid();
        for s in [1, 2, 777, 15439, 15440] {
            assert_eq!(g.thz_to_slice(g.slice_to_thz(s)), s);
        }
    }

    #[test]
    fn stop_edge_convention() {
        let g = grid();
        let stop = g.slice_to_thz(17);
        assert_eq!(g.stop_to_slice(stop), 16);
        assert!(close(g.slice_stop_thz(16), stop));
    }

    #[test]
    fn centers() {
        let g = SliceGrid::new(1_913_500_000, 500_000, 80).unwrap();
        assert!(close(g.range_center_thz(1, 1), 191.35));
        assert!(close(g.range_center_thz(2, 2), 191.40));
        assert!(close(g.range_center_thz(1, 2), 191.375));
        assert!(close(g.range_center_thz(3, 5), 191.50));
    }

    #[test]
    fn slice_bounds() {
        let g = grid();
        assert_eq!(g.checked_slice(0), None);
        assert_eq!(g.checked_slice(1), Some(1));
        assert_eq!(g.checked_slice(15440), Some(15440));
        assert_eq!(g.checked_slice(15441), None);
    }

    #[test]
    fn width_encodings() {
        let g = grid();
        assert_eq!(g.encode_width(0.010).unwrap(), 32);
        assert!(close(g.decode_width(32), 0.01));
        assert_eq!(g.encode_half_width(0.010).unwrap(), 16);
        assert!(close(g.decode_half_width(16), 33.0 * 3125.0 / FREQ_SCALE));
        assert!(g.encode_width(-1.0).is_err());
    }

    #[test]
    fn threshold_mode_accepts_non_positive_db() {
        let g = grid();
        assert_eq!(g.encode_bandwidth_threshold(-3.0).unwrap(), 30);
        assert_eq!(g.encode_bandwidth_threshold(0.0).unwrap(), 0);
        assert!(close(g.decode_bandwidth_threshold(30), -3.0));
        assert!(matches!(
            g.encode_bandwidth_threshold(1.0),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn fixed_mode_accepts_positive_bandwidth() {
        let g = fixed_mode_grid();
        assert_eq!(g.encode_bandwidth_threshold(0.010).unwrap(), 16);
        assert!(g.encode_bandwidth_threshold(0.0).is_err());
        assert!(g.encode_bandwidth_threshold(-3.0).is_err());
    }

    #[test]
    fn rbw_and_levels() {
        assert_eq!(encode_rbw(0.0125).unwrap(), 1250);
        assert!(close(decode_rbw(1250), 0.0125));
        assert!(close(power_db(-123), -12.3));
        assert!(close(temperature_c(415), 41.5));
        assert!(encode_rbw(1.0).is_err());
    }
}
