//! Channel plans.
//!
//! A plan is the ordered list of channels the module measures: power
//! records (slice ranges) and optional OSNR records (center search
//! ranges plus analysis windows). Record order is the channel index used
//! to correlate results.

use hrocm_core::error::{Error, Result};
use hrocm_wire::records::{BandwidthMode, OsnrPlanRecord, PowerPlanRecord};
use hrocm_wire::units::{encode_rbw, SliceGrid, FREQ_SCALE};

/// Port every generated channel is assigned to.
pub const DEFAULT_PORT: u16 = 1;

/// Analysis windows used when generating OSNR plan records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsnrParameters {
    /// Keep-out distance from the channel center, THz.
    pub search_min_thz: f64,
    /// Noise sampling distance from the channel center, THz.
    pub search_max_thz: f64,
    /// Bandwidth threshold relative to peak, dB (non-positive). Used when
    /// the module is in threshold mode.
    pub threshold_db: f64,
    /// Signal bandwidth, THz. Used in fixed-slice mode.
    pub threshold_thz: f64,
    /// Width searched for the noise tags, THz.
    pub tag_range_thz: f64,
    /// Resolution bandwidth the OSNR is normalized to, THz.
    pub rbw_thz: f64,
}

impl Default for OsnrParameters {
    fn default() -> Self {
        OsnrParameters {
            search_min_thz: 0.010,
            search_max_thz: 0.025,
            threshold_db: -3.0,
            threshold_thz: 0.010,
            tag_range_thz: 0.010,
            rbw_thz: 0.0125,
        }
    }
}

impl OsnrParameters {
    /// Build the OSNR record for a channel spanning `start..=end`.
    pub fn record(&self, grid: &SliceGrid, start: u16, end: u16) -> Result<OsnrPlanRecord> {
        let keepout = grid.encode_width(self.search_min_thz)?;
        let noise = grid.encode_width(self.search_max_thz)?;
        let threshold = match grid.bandwidth_mode() {
            BandwidthMode::Threshold => self.threshold_db,
            _ => self.threshold_thz,
        };
        Ok(OsnrPlanRecord {
            port: DEFAULT_PORT,
            center_start: start,
            center_stop: end,
            bandwidth_threshold: grid.encode_bandwidth_threshold(threshold)?,
            tag_range: grid.encode_half_width(self.tag_range_thz)?,
            noise_lower: noise,
            noise_upper: noise,
            keepout_lower: keepout,
            keepout_upper: keepout,
            rbw: encode_rbw(self.rbw_thz)?,
        })
    }
}

/// Power and OSNR plans that are uploaded together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelPlan {
    pub power: Vec<PowerPlanRecord>,
    pub osnr: Vec<OsnrPlanRecord>,
}

impl ChannelPlan {
    pub fn new(power: Vec<PowerPlanRecord>, osnr: Vec<OsnrPlanRecord>) -> Self {
        ChannelPlan { power, osnr }
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty() && self.osnr.is_empty()
    }

    pub fn has_osnr(&self) -> bool {
        !self.osnr.is_empty()
    }

    /// Equally spaced channels on a fixed grid.
    ///
    /// `start_thz` is the center of the first channel and `spacing_thz`
    /// both the spacing and the channel width. When `osnr` is given and a
    /// channel is wider than one slice, a matching OSNR plan is generated.
    pub fn itu(
        grid: &SliceGrid,
        start_thz: f64,
        spacing_thz: f64,
        count: usize,
        osnr: Option<&OsnrParameters>,
    ) -> Result<Self> {
        if spacing_thz.is_nan() || spacing_thz <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "channel spacing must be positive, got {spacing_thz} THz"
            )));
        }
        let start = (start_thz * FREQ_SCALE).round() as i64;
        let spacing = (spacing_thz * FREQ_SCALE).round() as i64;
        Self::itu_fixed(grid, start, spacing, count, osnr)
    }

    /// [`itu`](Self::itu) with frequencies already in fixed-point units.
    pub fn itu_fixed(
        grid: &SliceGrid,
        start: i64,
        spacing: i64,
        count: usize,
        osnr: Option<&OsnrParameters>,
    ) -> Result<Self> {
        if count > usize::from(grid.max_channels()) {
            return Err(Error::InvalidParameter(format!(
                "Too many channels requested: {count} (Max={})",
                grid.max_channels()
            )));
        }
        let width = f64::from(grid.slice_width());
        let lower_edge = start - spacing / 2 - i64::from(grid.first_slice_freq());
        let first = (lower_edge as f64 / width).round() as i64;
        let slices = (spacing as f64 / width).round() as i64;
        if slices < 1 {
            return Err(Error::InvalidParameter(format!(
                "channel spacing {spacing} is narrower than one slice ({})",
                grid.slice_width()
            )));
        }

        let mut power = Vec::with_capacity(count);
        for i in 0..count as i64 {
            let offset = first + i * slices;
            if offset < 0 || offset + slices - 1 >= i64::from(grid.max_slices()) {
                return Err(Error::InvalidParameter(format!(
                    "Slice number out of range (channel index {i})"
                )));
            }
            // offset is bounded by Smax above
            let start = (offset + 1) as u16;
            power.push(PowerPlanRecord {
                port: DEFAULT_PORT,
                start,
                end: start + (slices - 1) as u16,
            });
        }

        let osnr = match osnr {
            Some(params) if slices > 1 => power
                .iter()
                .map(|r| params.record(grid, r.start, r.end))
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };
        Ok(ChannelPlan { power, osnr })
    }

    /// Every slice but the last as its own channel.
    pub fn high_resolution(grid: &SliceGrid) -> Result<Self> {
        let width = i64::from(grid.slice_width());
        Self::itu_fixed(
            grid,
            i64::from(grid.first_slice_freq()) + width / 2,
            width,
            usize::from(grid.max_slices()).saturating_sub(1),
            None,
        )
    }

    /// Prepend single-slice channels covering `first..=last`.
    ///
    /// Results of such a section are the reference for peak-power
    /// derivation of the OSNR channels that follow.
    pub fn with_high_resolution_section(mut self, first: u16, last: u16) -> Self {
        let section = (first..=last).map(|slice| PowerPlanRecord {
            port: DEFAULT_PORT,
            start: slice,
            end: slice,
        });
        self.power.splice(0..0, section);
        self
    }

    /// Check every record against the module's limits.
    pub fn validate(&self, grid: &SliceGrid) -> Result<()> {
        let max = usize::from(grid.max_channels());
        for (what, len) in [("power", self.power.len()), ("OSNR", self.osnr.len())] {
            if len > max {
                return Err(Error::InvalidParameter(format!(
                    "Too many {what} channels: {len} (Max={max})"
                )));
            }
        }
        for (i, r) in self.power.iter().enumerate() {
            check_range(grid, r.start, r.end, "slice", i)?;
        }
        for (i, r) in self.osnr.iter().enumerate() {
            check_range(grid, r.center_start, r.center_stop, "center slice", i)?;
        }
        Ok(())
    }
}

fn check_range(grid: &SliceGrid, start: u16, end: u16, what: &str, index: usize) -> Result<()> {
    if !grid.contains(i64::from(start)) {
        return Err(Error::InvalidParameter(format!(
            "Start {what} number {start} out of range (channel index {index})"
        )));
    }
    if !grid.contains(i64::from(end)) {
        return Err(Error::InvalidParameter(format!(
            "End {what} number {end} out of range (channel index {index})"
        )));
    }
    if end < start {
        return Err(Error::InvalidParameter(format!(
            "End {what} number smaller than start {what} number (channel index {index})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrocm_wire::records::DeviceInfo;

    fn grid(fsf: u32, slw: u32, smax: u16, mode: BandwidthMode) -> SliceGrid {
        let info = DeviceInfo {
            hardware_revision: 0,
            firmware_revision: 0,
            serial_number: String::new(),
            manufacturing_date: String::new(),
            label: String::new(),
            module_id: String::new(),
            max_ports: 1,
            max_slices: smax,
            max_channels: 96,
            bandwidth_mode: mode,
            slice_width: slw,
            first_slice_freq: fsf,
            capabilities: 0,
        };
        SliceGrid::from_device(&info).unwrap()
    }

    fn fine() -> SliceGrid {
        // 3.125 GHz slices from 191.3125 THz
        grid(1_913_125_000, 31_250, 1544, BandwidthMode::Threshold)
    }

    #[test]
    fn itu_plan_on_fine_grid() {
        let g = fine();
        // 50 GHz channels centered from 191.35 THz: 16 slices each
        let plan = ChannelPlan::itu(&g, 191.35, 0.05, 4, None).unwrap();
        assert_eq!(plan.power.len(), 4);
        assert_eq!(plan.power[0].start, 5);
        assert_eq!(plan.power[0].end, 20);
        assert_eq!(plan.power[1].start, 21);
        assert!(plan.osnr.is_empty());
        assert!((g.slice_to_thz(5) - 191.325).abs() < 1e-9);
        assert!((g.slice_stop_thz(20) - 191.375).abs() < 1e-9);
    }

    #[test]
    fn itu_plan_generates_osnr_records() {
        let g = fine();
        let plan = ChannelPlan::itu(&g, 191.35, 0.05, 2, Some(&OsnrParameters::default())).unwrap();
        assert_eq!(plan.osnr.len(), 2);
        let r = plan.osnr[0];
        assert_eq!((r.center_start, r.center_stop), (5, 20));
        assert_eq!(r.keepout_lower, 3); // 10 GHz / 3.125 GHz = 3.2
        assert_eq!(r.noise_upper, 8); // 25 GHz / 3.125 GHz
        assert_eq!(r.bandwidth_threshold, 30);
        assert_eq!(r.rbw, 1250);
    }

    #[test]
    fn fixed_mode_encodes_bandwidth_as_half_width() {
        let g = grid(1_913_125_000, 31_250, 1544, BandwidthMode::FixedSlices);
        let plan = ChannelPlan::itu(&g, 191.35, 0.05, 1, Some(&OsnrParameters::default())).unwrap();
        // 10 GHz is 3.2 slices: (3.2 - 1) / 2 rounds to 1
        assert_eq!(plan.osnr[0].bandwidth_threshold, 1);
    }

    #[test]
    fn single_slice_channels_skip_osnr() {
        let g = grid(1_913_500_000, 500_000, 80, BandwidthMode::Threshold);
        let plan =
            ChannelPlan::itu(&g, 191.375, 0.05, 80, Some(&OsnrParameters::default())).unwrap();
        assert_eq!(plan.power.len(), 80);
        assert_eq!(plan.power[79].start, 80);
        assert!(plan.osnr.is_empty());
    }

    #[test]
    fn too_many_channels() {
        let err = ChannelPlan::itu(&fine(), 191.35, 0.05, 97, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid parameter: Too many channels requested: 97 (Max=96)"
        );
    }

    #[test]
    fn channel_past_the_band_is_rejected() {
        let g = grid(1_913_500_000, 500_000, 80, BandwidthMode::Threshold);
        let err = ChannelPlan::itu(&g, 191.375, 0.05, 81, None).unwrap_err();
        assert!(err.to_string().contains("channel index 80"));
        let err = ChannelPlan::itu(&g, 191.30, 0.05, 1, None).unwrap_err();
        assert!(err.to_string().contains("channel index 0"));
    }

    #[test]
    fn high_resolution_plan_covers_all_but_last_slice() {
        let g = grid(1_913_500_000, 500_000, 80, BandwidthMode::Threshold);
        let plan = ChannelPlan::high_resolution(&g).unwrap();
        assert_eq!(plan.power.len(), 79);
        assert!(plan.power.iter().enumerate().all(|(i, r)| {
            r.start == r.end && usize::from(r.start) == i + 1
        }));
    }

    #[test]
    fn high_resolution_section_is_prepended() {
        let plan = ChannelPlan::new(
            vec![PowerPlanRecord { port: 1, start: 20, end: 35 }],
            Vec::new(),
        )
        .with_high_resolution_section(1, 3);
        let starts: Vec<u16> = plan.power.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![1, 2, 3, 20]);
    }

    #[test]
    fn validate_reports_offending_channel() {
        let g = grid(1_913_500_000, 500_000, 80, BandwidthMode::Threshold);
        let plan = ChannelPlan::new(
            vec![
                PowerPlanRecord { port: 1, start: 1, end: 2 },
                PowerPlanRecord { port: 1, start: 79, end: 81 },
            ],
            Vec::new(),
        );
        let err = plan.validate(&g).unwrap_err();
        assert!(err.to_string().contains("End slice number 81 out of range (channel index 1)"));

        let reversed = ChannelPlan::new(
            vec![PowerPlanRecord { port: 1, start: 5, end: 4 }],
            Vec::new(),
        );
        assert!(reversed.validate(&g).unwrap_err().to_string().contains("smaller"));

        let zero = ChannelPlan::new(
            Vec::new(),
            vec![OsnrPlanRecord {
                center_start: 0,
                center_stop: 4,
                ..OsnrPlanRecord::default()
            }],
        );
        assert!(zero.validate(&g).unwrap_err().to_string().contains("Start center slice"));
    }
}
