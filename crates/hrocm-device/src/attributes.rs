//! Named attributes.
//!
//! Host tooling addresses module values by name rather than by opcode.
//! Three families exist:
//!
//! - [`NumericKey`]: read-only scalars from the capability record, the last
//!   header and the last scan.
//! - [`TextKey`]: identification strings.
//! - [`VectorKey`]: one value per channel, in THz or dB. The plan keys are
//!   writable; writing edits the stored plan without transmitting it.
//!
//! The functions here are pure conversions. [`HrocmDevice`] supplies the
//! cached state and records failures in its diagnostics log.
//!
//! [`HrocmDevice`]: crate::HrocmDevice

use std::fmt;

use hrocm_core::error::{Error, Result};
use hrocm_core::helpers::format_revision;
use hrocm_wire::frame::Header;
use hrocm_wire::records::{BandwidthMode, DeviceInfo, OsnrPlanRecord, PowerPlanRecord};
use hrocm_wire::units::{decode_rbw, encode_rbw, temperature_c, SliceGrid, FREQ_SCALE, POWER_SCALE};

use crate::plan::{ChannelPlan, DEFAULT_PORT};
use crate::postprocess::ScanData;

// ---------------------------------------------------------------
// Numeric
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKey {
    MaxChannels,
    /// THz.
    FirstSliceFrequency,
    /// THz.
    SliceWidth,
    MaxSlices,
    /// Degrees Celsius.
    ModuleTemperature,
    /// Degrees Celsius.
    OpticsTemperature,
    HardwareStatus,
    LatchedStatus,
    OperationalStatus,
    ScanNumber,
    /// 1 when the module reports OSNR bandwidth as a threshold below peak.
    OsnrThresholdCapable,
    /// 1 when the module reports OSNR bandwidth as a fixed slice count.
    OsnrFixedCapable,
}

impl NumericKey {
    pub const ALL: [NumericKey; 12] = [
        NumericKey::MaxChannels,
        NumericKey::FirstSliceFrequency,
        NumericKey::SliceWidth,
        NumericKey::MaxSlices,
        NumericKey::ModuleTemperature,
        NumericKey::OpticsTemperature,
        NumericKey::HardwareStatus,
        NumericKey::LatchedStatus,
        NumericKey::OperationalStatus,
        NumericKey::ScanNumber,
        NumericKey::OsnrThresholdCapable,
        NumericKey::OsnrFixedCapable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NumericKey::MaxChannels => "MAXCH",
            NumericKey::FirstSliceFrequency => "FIRSTSLICEFREQ",
            NumericKey::SliceWidth => "SLICEWIDTH",
            NumericKey::MaxSlices => "MAXSLICES",
            NumericKey::ModuleTemperature => "MODULETEMP",
            NumericKey::OpticsTemperature => "OPTICSTEMP",
            NumericKey::HardwareStatus => "HARDWARESTATUS",
            NumericKey::LatchedStatus => "HARDWARESTATUSLATCHED",
            NumericKey::OperationalStatus => "OPERATIONALSTATUS",
            NumericKey::ScanNumber => "SCANNO",
            NumericKey::OsnrThresholdCapable => "CAP_OSNRTHRES",
            NumericKey::OsnrFixedCapable => "CAP_OSNRFIXED",
        }
    }

    /// Value of this key from the cached capability record, the last
    /// validated header and the last read scan.
    pub fn read(self, info: &DeviceInfo, header: &Header, scan: &ScanData) -> f64 {
        let threshold = info.bandwidth_mode == BandwidthMode::Threshold;
        match self {
            NumericKey::MaxChannels => f64::from(info.max_channels),
            NumericKey::FirstSliceFrequency => f64::from(info.first_slice_freq) / FREQ_SCALE,
            NumericKey::SliceWidth => f64::from(info.slice_width) / FREQ_SCALE,
            NumericKey::MaxSlices => f64::from(info.max_slices),
            NumericKey::ModuleTemperature => temperature_c(header.case_temperature),
            NumericKey::OpticsTemperature => temperature_c(header.internal_temperature),
            NumericKey::HardwareStatus => f64::from(header.hardware_status),
            NumericKey::LatchedStatus => f64::from(header.latched_status),
            NumericKey::OperationalStatus => f64::from(header.operational_status),
            NumericKey::ScanNumber => f64::from(scan.scan_number()),
            NumericKey::OsnrThresholdCapable => f64::from(u8::from(threshold)),
            NumericKey::OsnrFixedCapable => f64::from(u8::from(!threshold)),
        }
    }
}

impl fmt::Display for NumericKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------
// Text
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKey {
    /// Accumulated diagnostics, emptied by reading.
    LastError,
    SerialNumber,
    ManufacturingDate,
    Label,
    /// User-assigned id. The only writable text key.
    ModuleId,
    FirmwareVersion,
    HardwareVersion,
}

impl TextKey {
    pub fn name(self) -> &'static str {
        match self {
            TextKey::LastError => "LASTERROR",
            TextKey::SerialNumber => "SERIALNO",
            TextKey::ManufacturingDate => "MANUFACTURINGDATE",
            TextKey::Label => "LABEL",
            TextKey::ModuleId => "MODULEID",
            TextKey::FirmwareVersion => "FIRMWAREVERSION",
            TextKey::HardwareVersion => "HARDWAREVERSION",
        }
    }

    /// Value from the capability record. `None` for [`TextKey::LastError`],
    /// which lives in the session's diagnostics.
    pub fn read(self, info: &DeviceInfo) -> Option<String> {
        let value = match self {
            TextKey::LastError => return None,
            TextKey::SerialNumber => info.serial_number.clone(),
            TextKey::ManufacturingDate => info.manufacturing_date.clone(),
            TextKey::Label => info.label.clone(),
            TextKey::ModuleId => info.module_id.clone(),
            TextKey::FirmwareVersion => format_revision(info.firmware_revision),
            TextKey::HardwareVersion => format_revision(info.hardware_revision),
        };
        Some(value)
    }
}

impl fmt::Display for TextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------
// Vector
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKey {
    /// Channel start frequencies, THz.
    PlanStart,
    /// Channel stop frequencies, THz.
    PlanStop,
    /// Channel center frequencies, THz. Read-only.
    PlanCenter,
    OsnrCenterStart,
    OsnrCenterStop,
    /// dB below peak in threshold mode, THz in fixed-slice mode.
    OsnrBandwidthThreshold,
    OsnrTagRange,
    OsnrNoiseLower,
    OsnrNoiseUpper,
    OsnrKeepoutLower,
    OsnrKeepoutUpper,
    OsnrRbw,
    /// dB.
    ScanOsnr,
    ScanOsnrBandwidthLower,
    ScanOsnrBandwidthUpper,
    ScanNoiseTagLower,
    ScanNoiseTagUpper,
    /// dB, one per OSNR channel.
    ScanPeakPower,
    /// THz, high-resolution section followed by the OSNR channels.
    ScanCenter,
    /// dB, power channels with OSNR channel powers merged in.
    ScanPower,
}

impl VectorKey {
    pub fn name(self) -> &'static str {
        match self {
            VectorKey::PlanStart => "CHANNELPLAN_FSTART",
            VectorKey::PlanStop => "CHANNELPLAN_FSTOP",
            VectorKey::PlanCenter => "CHANNELPLAN_FCENTER",
            VectorKey::OsnrCenterStart => "CHANNELPLAN_OSNRCENTERSTART",
            VectorKey::OsnrCenterStop => "CHANNELPLAN_OSNRCENTERSTOP",
            VectorKey::OsnrBandwidthThreshold => "CHANNELPLAN_OSNRCENTERBWTHRES",
            VectorKey::OsnrTagRange => "CHANNELPLAN_OSNRTAGRANGE",
            VectorKey::OsnrNoiseLower => "CHANNELPLAN_OSNRNOISELOWER",
            VectorKey::OsnrNoiseUpper => "CHANNELPLAN_OSNRNOISEUPPER",
            VectorKey::OsnrKeepoutLower => "CHANNELPLAN_OSNRKEEPOUTLOWER",
            VectorKey::OsnrKeepoutUpper => "CHANNELPLAN_OSNRKEEPOUTUPPER",
            VectorKey::OsnrRbw => "CHANNELPLAN_OSNRRBW",
            VectorKey::ScanOsnr => "SCAN_OSNR",
            VectorKey::ScanOsnrBandwidthLower => "SCAN_OSNRBANDWIDTHLOWER",
            VectorKey::ScanOsnrBandwidthUpper => "SCAN_OSNRBANDWIDTHUPPER",
            VectorKey::ScanNoiseTagLower => "SCAN_OSNRNOISETAGLOWER",
            VectorKey::ScanNoiseTagUpper => "SCAN_OSNRNOISETAGUPPER",
            VectorKey::ScanPeakPower => "SCAN_PEAKPOWER",
            VectorKey::ScanCenter => "SCAN_FCENTER",
            VectorKey::ScanPower => "SCAN_POWER",
        }
    }

    /// Returns `true` for keys that edit the stored channel plan.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            VectorKey::PlanStart
                | VectorKey::PlanStop
                | VectorKey::OsnrCenterStart
                | VectorKey::OsnrCenterStop
                | VectorKey::OsnrBandwidthThreshold
                | VectorKey::OsnrTagRange
                | VectorKey::OsnrNoiseLower
                | VectorKey::OsnrNoiseUpper
                | VectorKey::OsnrKeepoutLower
                | VectorKey::OsnrKeepoutUpper
                | VectorKey::OsnrRbw
        )
    }

    pub fn read(self, grid: &SliceGrid, plan: &ChannelPlan, scan: &ScanData) -> Vec<f64> {
        let slice = |s: u16| grid.slice_to_thz(i64::from(s));
        let stop = |s: u16| grid.slice_stop_thz(i64::from(s));
        match self {
            VectorKey::PlanStart => plan.power.iter().map(|r| slice(r.start)).collect(),
            VectorKey::PlanStop => plan.power.iter().map(|r| stop(r.end)).collect(),
            VectorKey::PlanCenter => plan
                .power
                .iter()
                .map(|r| grid.range_center_thz(i64::from(r.start), i64::from(r.end)))
                .collect(),
            VectorKey::OsnrCenterStart => plan.osnr.iter().map(|r| slice(r.center_start)).collect(),
            VectorKey::OsnrCenterStop => plan.osnr.iter().map(|r| stop(r.center_stop)).collect(),
            VectorKey::OsnrBandwidthThreshold => plan
                .osnr
                .iter()
                .map(|r| grid.decode_bandwidth_threshold(r.bandwidth_threshold))
                .collect(),
            VectorKey::OsnrTagRange => plan
                .osnr
                .iter()
                .map(|r| grid.decode_half_width(r.tag_range))
                .collect(),
            VectorKey::OsnrNoiseLower => osnr_widths(grid, plan, |r| r.noise_lower),
            VectorKey::OsnrNoiseUpper => osnr_widths(grid, plan, |r| r.noise_upper),
            VectorKey::OsnrKeepoutLower => osnr_widths(grid, plan, |r| r.keepout_lower),
            VectorKey::OsnrKeepoutUpper => osnr_widths(grid, plan, |r| r.keepout_upper),
            VectorKey::OsnrRbw => plan.osnr.iter().map(|r| decode_rbw(r.rbw)).collect(),
            VectorKey::ScanOsnr => scan
                .osnr
                .records
                .iter()
                .map(|r| f64::from(r.osnr) / POWER_SCALE)
                .collect(),
            VectorKey::ScanOsnrBandwidthLower => {
                scan.osnr.records.iter().map(|r| slice(r.bandwidth_lower)).collect()
            }
            VectorKey::ScanOsnrBandwidthUpper => {
                scan.osnr.records.iter().map(|r| slice(r.bandwidth_upper)).collect()
            }
            VectorKey::ScanNoiseTagLower => {
                scan.osnr.records.iter().map(|r| slice(r.noise_tag_lower)).collect()
            }
            VectorKey::ScanNoiseTagUpper => {
                scan.osnr.records.iter().map(|r| slice(r.noise_tag_upper)).collect()
            }
            VectorKey::ScanPeakPower => scan.peak_power.clone(),
            VectorKey::ScanCenter => scan.merged_centers(grid),
            VectorKey::ScanPower => scan.merged_power(),
        }
    }

    /// Write `values` into `plan`, one per channel.
    ///
    /// The affected plan is resized to `values.len()`; new channels start
    /// out zeroed on port 1. Nothing is transmitted.
    pub fn write(self, grid: &SliceGrid, plan: &mut ChannelPlan, values: &[f64]) -> Result<()> {
        if !self.is_writable() {
            return Err(Error::InvalidParameter(format!("{self} is read-only")));
        }
        match self {
            VectorKey::PlanStart | VectorKey::PlanStop => {
                plan.power.resize(
                    values.len(),
                    PowerPlanRecord {
                        port: DEFAULT_PORT,
                        start: 0,
                        end: 0,
                    },
                );
                for (i, (record, &value)) in plan.power.iter_mut().zip(values).enumerate() {
                    record.port = DEFAULT_PORT;
                    if self == VectorKey::PlanStart {
                        let slice = grid.thz_to_slice(value);
                        record.start = plan_slice(grid, slice, "Start slice", i)?;
                    } else {
                        record.end = plan_slice(grid, grid.stop_to_slice(value), "End slice", i)?;
                    }
                }
            }
            _ => {
                plan.osnr.resize(values.len(), OsnrPlanRecord::default());
                for (i, (record, &value)) in plan.osnr.iter_mut().zip(values).enumerate() {
                    record.port = DEFAULT_PORT;
                    write_osnr_field(self, grid, record, value, i)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for VectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn osnr_widths(
    grid: &SliceGrid,
    plan: &ChannelPlan,
    field: fn(&OsnrPlanRecord) -> u16,
) -> Vec<f64> {
    plan.osnr.iter().map(|r| grid.decode_width(field(r))).collect()
}

fn plan_slice(grid: &SliceGrid, slice: i64, what: &str, index: usize) -> Result<u16> {
    grid.checked_slice(slice).ok_or_else(|| {
        Error::InvalidParameter(format!(
            "{what} number {slice} out of range (channel index {index})"
        ))
    })
}

fn write_osnr_field(
    key: VectorKey,
    grid: &SliceGrid,
    record: &mut OsnrPlanRecord,
    value: f64,
    index: usize,
) -> Result<()> {
    match key {
        VectorKey::OsnrCenterStart => {
            record.center_start = plan_slice(grid, grid.thz_to_slice(value), "Slice", index)?;
        }
        VectorKey::OsnrCenterStop => {
            record.center_stop = plan_slice(grid, grid.stop_to_slice(value), "Slice", index)?;
        }
        VectorKey::OsnrBandwidthThreshold => {
            record.bandwidth_threshold = grid.encode_bandwidth_threshold(value)?;
        }
        VectorKey::OsnrTagRange => record.tag_range = grid.encode_half_width(value)?,
        VectorKey::OsnrNoiseLower => record.noise_lower = grid.encode_width(value)?,
        VectorKey::OsnrNoiseUpper => record.noise_upper = grid.encode_width(value)?,
        VectorKey::OsnrKeepoutLower => record.keepout_lower = grid.encode_width(value)?,
        VectorKey::OsnrKeepoutUpper => record.keepout_upper = grid.encode_width(value)?,
        VectorKey::OsnrRbw => record.rbw = encode_rbw(value)?,
        _ => return Err(Error::InvalidParameter(format!("{key} is read-only"))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrocm_wire::records::{OsnrResults, OsnrScanRecord, PowerResults, PowerScanRecord};

    // 50 GHz slices from 191.35 THz
    fn grid() -> SliceGrid {
        SliceGrid::new(1_913_500_000, 500_000, 80).unwrap()
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn plan_frequencies_round_trip_through_slices() {
        let g = grid();
        let mut plan = ChannelPlan::default();
        VectorKey::PlanStart
            .write(&g, &mut plan, &[191.35, 191.45])
            .unwrap();
        VectorKey::PlanStop.write(&g, &mut plan, &[191.45, 191.60]).unwrap();

        assert_eq!(plan.power[0], PowerPlanRecord { port: 1, start: 1, end: 2 });
        assert_eq!(plan.power[1], PowerPlanRecord { port: 1, start: 3, end: 5 });

        let scan = ScanData::default();
        assert!(close(&VectorKey::PlanStart.read(&g, &plan, &scan), &[191.35, 191.45]));
        assert!(close(&VectorKey::PlanStop.read(&g, &plan, &scan), &[191.45, 191.60]));
        assert!(close(&VectorKey::PlanCenter.read(&g, &plan, &scan), &[191.375, 191.50]));
    }

    #[test]
    fn out_of_range_frequency_is_rejected() {
        let g = grid();
        let mut plan = ChannelPlan::default();
        let err = VectorKey::PlanStart
            .write(&g, &mut plan, &[191.35, 180.0])
            .unwrap_err();
        assert!(err.to_string().contains("Start slice number"));
        assert!(err.to_string().contains("channel index 1"));

        let err = VectorKey::PlanStop.write(&g, &mut plan, &[191.35]).unwrap_err();
        assert!(err.to_string().contains("End slice number 0"));
    }

    #[test]
    fn writing_shrinks_plan() {
        let g = grid();
        let mut plan = ChannelPlan::default();
        VectorKey::PlanStart
            .write(&g, &mut plan, &[191.35, 191.40, 191.45])
            .unwrap();
        VectorKey::PlanStart.write(&g, &mut plan, &[191.35]).unwrap();
        assert_eq!(plan.power.len(), 1);
    }

    #[test]
    fn osnr_parameters_follow_bandwidth_mode() {
        let g = grid();
        let mut plan = ChannelPlan::default();
        VectorKey::OsnrBandwidthThreshold
            .write(&g, &mut plan, &[-3.0])
            .unwrap();
        assert_eq!(plan.osnr[0].bandwidth_threshold, 30);
        assert!(VectorKey::OsnrBandwidthThreshold
            .write(&g, &mut plan, &[0.05])
            .is_err());

        VectorKey::OsnrNoiseLower.write(&g, &mut plan, &[0.15]).unwrap();
        VectorKey::OsnrRbw.write(&g, &mut plan, &[0.0125]).unwrap();
        assert_eq!(plan.osnr[0].noise_lower, 3);
        assert_eq!(plan.osnr[0].rbw, 1250);

        let scan = ScanData::default();
        assert!(close(&VectorKey::OsnrNoiseLower.read(&g, &plan, &scan), &[0.15]));
        assert!(close(&VectorKey::OsnrRbw.read(&g, &plan, &scan), &[0.0125]));
        assert!(close(
            &VectorKey::OsnrBandwidthThreshold.read(&g, &plan, &scan),
            &[-3.0]
        ));
    }

    #[test]
    fn result_keys_are_read_only() {
        let mut plan = ChannelPlan::default();
        for key in [VectorKey::ScanPower, VectorKey::PlanCenter, VectorKey::ScanOsnr] {
            assert!(!key.is_writable());
            assert!(key.write(&grid(), &mut plan, &[1.0]).is_err());
        }
        assert!(plan.is_empty());
    }

    #[test]
    fn scan_keys_convert_units() {
        let g = grid();
        let power = PowerResults {
            header: Default::default(),
            records: vec![PowerScanRecord {
                port: 1,
                start: 1,
                end: 4,
                power: -215,
            }],
        };
        let osnr = OsnrResults {
            header: Default::default(),
            records: vec![OsnrScanRecord {
                port: 1,
                start: 1,
                end: 4,
                osnr: 312,
                power: -200,
                noise_tag_lower: 1,
                noise_tag_upper: 4,
                bandwidth_lower: 2,
                bandwidth_upper: 3,
                center: 2,
            }],
        };
        let scan = ScanData::new(power, osnr);
        let plan = ChannelPlan::default();
        assert!(close(&VectorKey::ScanOsnr.read(&g, &plan, &scan), &[31.2]));
        assert!(close(&VectorKey::ScanPower.read(&g, &plan, &scan), &[-21.5]));
        assert!(close(
            &VectorKey::ScanOsnrBandwidthLower.read(&g, &plan, &scan),
            &[191.40]
        ));
        assert!(close(&VectorKey::ScanNoiseTagUpper.read(&g, &plan, &scan), &[191.50]));
        assert!(VectorKey::ScanPeakPower.read(&g, &plan, &scan).is_empty());
    }

    #[test]
    fn numeric_and_text_keys() {
        let info = DeviceInfo {
            hardware_revision: 0x0102_0000,
            firmware_revision: 0x0304_0502,
            serial_number: "SN42".into(),
            manufacturing_date: "2024-01-01".into(),
            label: "ocm".into(),
            module_id: "bay 3".into(),
            max_ports: 1,
            max_slices: 80,
            max_channels: 96,
            bandwidth_mode: BandwidthMode::FixedSlices,
            slice_width: 500_000,
            first_slice_freq: 1_913_500_000,
            capabilities: 0,
        };
        let header = Header {
            case_temperature: 352,
            latched_status: 4,
            ..Header::new(0x0A, 1)
        };
        let scan = ScanData::default();

        assert_eq!(NumericKey::MaxChannels.read(&info, &header, &scan), 96.0);
        assert!((NumericKey::SliceWidth.read(&info, &header, &scan) - 0.05).abs() < 1e-12);
        assert!((NumericKey::ModuleTemperature.read(&info, &header, &scan) - 35.2).abs() < 1e-9);
        assert_eq!(NumericKey::LatchedStatus.read(&info, &header, &scan), 4.0);
        assert_eq!(NumericKey::OsnrThresholdCapable.read(&info, &header, &scan), 0.0);
        assert_eq!(NumericKey::OsnrFixedCapable.read(&info, &header, &scan), 1.0);

        assert_eq!(TextKey::ModuleId.read(&info).as_deref(), Some("bay 3"));
        assert_eq!(TextKey::FirmwareVersion.read(&info).as_deref(), Some("3.4.5rc2"));
        assert_eq!(TextKey::HardwareVersion.read(&info).as_deref(), Some("1.2.0"));
        assert_eq!(TextKey::LastError.read(&info), None);
    }
}
