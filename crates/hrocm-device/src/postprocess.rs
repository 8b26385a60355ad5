//! Post-processing of scan results.
//!
//! A power plan may open with a *high-resolution section*: a run of
//! channels exactly one slice wide. The OSNR engine integrates over a
//! whole channel, so the narrowband peak power of an OSNR channel is
//! taken from that section instead, at the slice the OSNR engine reported
//! as the channel center.

use hrocm_wire::records::{OsnrResults, OsnrScanRecord, PowerResults, PowerScanRecord};
use hrocm_wire::units::{power_db, SliceGrid, PMIN_CLIP};

/// Length of the leading run of single-slice channels.
pub fn high_resolution_run(power: &[PowerScanRecord]) -> usize {
    power.iter().take_while(|r| r.start == r.end).count()
}

/// Peak power per OSNR channel, in dB.
///
/// Empty unless the power results open with a high-resolution section of
/// more than one slice and OSNR results exist. Channels whose center
/// falls outside the section get [`PMIN_CLIP`].
pub fn peak_power(power: &[PowerScanRecord], osnr: &[OsnrScanRecord]) -> Vec<f64> {
    let run = high_resolution_run(power);
    if run <= 1 || osnr.is_empty() {
        return Vec::new();
    }
    let first = i64::from(power[0].start);
    osnr.iter()
        .map(|r| {
            let index = i64::from(r.center) - first;
            match usize::try_from(index) {
                Ok(index) if index < run => power_db(power[index].power),
                _ => PMIN_CLIP,
            }
        })
        .collect()
}

/// Power per channel in dB, with OSNR channel powers written over the
/// channels following the high-resolution section.
pub fn merged_power(power: &[PowerScanRecord], osnr: &[OsnrScanRecord]) -> Vec<f64> {
    let mut merged: Vec<f64> = power.iter().map(|r| power_db(r.power)).collect();
    let run = high_resolution_run(power);
    if run > 0 {
        for (slot, r) in merged.iter_mut().skip(run).zip(osnr) {
            *slot = power_db(r.power);
        }
    }
    merged
}

/// Center frequency per reported channel, THz.
///
/// With OSNR results this is the start frequency of each high-resolution
/// slice followed by the frequency of each OSNR center slice; otherwise it
/// is the range center of every power channel.
pub fn merged_centers(
    grid: &SliceGrid,
    power: &[PowerScanRecord],
    osnr: &[OsnrScanRecord],
) -> Vec<f64> {
    if osnr.is_empty() {
        return power
            .iter()
            .map(|r| grid.range_center_thz(i64::from(r.start), i64::from(r.end)))
            .collect();
    }
    let run = high_resolution_run(power);
    power[..run]
        .iter()
        .map(|r| grid.slice_to_thz(i64::from(r.start)))
        .chain(osnr.iter().map(|r| grid.slice_to_thz(i64::from(r.center))))
        .collect()
}

/// Results of the last scan that was read, with derived values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanData {
    pub power: PowerResults,
    pub osnr: OsnrResults,
    /// Peak power per OSNR channel, see [`peak_power`].
    pub peak_power: Vec<f64>,
}

impl ScanData {
    pub fn new(power: PowerResults, osnr: OsnrResults) -> Self {
        let peak_power = peak_power(&power.records, &osnr.records);
        ScanData {
            power,
            osnr,
            peak_power,
        }
    }

    /// Module scan counter of the power results.
    pub fn scan_number(&self) -> u32 {
        self.power.header.scan
    }

    pub fn merged_power(&self) -> Vec<f64> {
        merged_power(&self.power.records, &self.osnr.records)
    }

    pub fn merged_centers(&self, grid: &SliceGrid) -> Vec<f64> {
        merged_centers(grid, &self.power.records, &self.osnr.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hires(slice: u16, power: i16) -> PowerScanRecord {
        PowerScanRecord {
            port: 1,
            start: slice,
            end: slice,
            power,
        }
    }

    fn wide(start: u16, end: u16, power: i16) -> PowerScanRecord {
        PowerScanRecord {
            port: 1,
            start,
            end,
            power,
        }
    }

    fn osnr(center: u16, power: i16) -> OsnrScanRecord {
        OsnrScanRecord {
            port: 1,
            start: center.saturating_sub(2),
            end: center + 2,
            osnr: 250,
            power,
            noise_tag_lower: 0,
            noise_tag_upper: 0,
            bandwidth_lower: 0,
            bandwidth_upper: 0,
            center,
        }
    }

    fn sample() -> Vec<PowerScanRecord> {
        vec![
            hires(1, -400),
            hires(2, -123),
            hires(3, -50),
            hires(4, -300),
            wide(1, 2, -90),
            wide(3, 4, -45),
        ]
    }

    #[test]
    fn run_stops_at_first_wide_channel() {
        assert_eq!(high_resolution_run(&sample()), 4);
        assert_eq!(high_resolution_run(&[wide(1, 2, 0), hires(3, 0)]), 0);
        assert_eq!(high_resolution_run(&[]), 0);
    }

    #[test]
    fn peak_power_looks_up_center_slice() {
        let peaks = peak_power(&sample(), &[osnr(2, -80), osnr(3, -40), osnr(9, -10)]);
        assert_eq!(peaks, vec![-12.3, -5.0, PMIN_CLIP]);
    }

    #[test]
    fn peak_power_honours_section_offset() {
        let power = vec![hires(11, -100), hires(12, -200), wide(11, 12, -50)];
        let peaks = peak_power(&power, &[osnr(12, 0), osnr(10, 0)]);
        assert_eq!(peaks, vec![-20.0, PMIN_CLIP]);
    }

    #[test]
    fn peak_power_needs_section_and_osnr() {
        assert!(peak_power(&sample(), &[]).is_empty());
        let single = vec![hires(1, 0), wide(2, 5, 0)];
        assert!(peak_power(&single, &[osnr(1, 0)]).is_empty());
    }

    #[test]
    fn merged_power_overwrites_after_section() {
        let merged = merged_power(&sample(), &[osnr(2, -77), osnr(3, -33), osnr(4, -11)]);
        assert_eq!(merged, vec![-40.0, -12.3, -5.0, -30.0, -7.7, -3.3]);
    }

    #[test]
    fn merged_power_without_section_is_plain() {
        let power = vec![wide(1, 4, -10), wide(5, 8, -20)];
        assert_eq!(merged_power(&power, &[osnr(2, -99)]), vec![-1.0, -2.0]);
    }

    #[test]
    fn merged_centers_prepend_section() {
        let grid = SliceGrid::new(1_913_500_000, 500_000, 80).unwrap();
        let centers = merged_centers(&grid, &sample(), &[osnr(2, 0), osnr(3, 0)]);
        assert_eq!(centers.len(), 6);
        assert!((centers[0] - 191.35).abs() < 1e-9);
        assert!((centers[4] - 191.40).abs() < 1e-9);

        let plain = merged_centers(&grid, &[wide(1, 2, 0)], &[]);
        assert!((plain[0] - 191.375).abs() < 1e-9);
    }

    #[test]
    fn scan_data_derives_peak_power() {
        let power = PowerResults {
            header: Default::default(),
            records: sample(),
        };
        let osnr = OsnrResults {
            header: Default::default(),
            records: vec![osnr(2, -80)],
        };
        let data = ScanData::new(power, osnr);
        assert_eq!(data.peak_power, vec![-12.3]);
        assert_eq!(data.merged_power().len(), 6);
        assert!(ScanData::default().peak_power.is_empty());
    }
}
