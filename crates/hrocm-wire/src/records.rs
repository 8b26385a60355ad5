//! Fixed-layout payload records.
//!
//! Every payload the driver sends or receives is a little-endian sequence
//! of fixed-size records, optionally behind a short header. Records are
//! decoded field by field with explicit bounds checks; nothing here relies
//! on host memory layout.

use std::fmt;
use std::fmt::Write as _;

use bytes::{Buf, BufMut, BytesMut};
use hrocm_core::{format_revision, text_field, Error, Result};

use crate::opcode::Opcode;

fn ensure_len(bytes: &[u8], needed: usize, what: &str) -> Result<()> {
    if bytes.len() < needed {
        return Err(Error::Protocol(format!(
            "{what}: need {needed} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn put_text(buf: &mut BytesMut, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(width);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(b' ', width - n);
}

/// A fixed-size record in a payload array.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const LEN: usize;

    /// Decode one record. The caller guarantees `LEN` bytes remain.
    fn read(buf: &mut &[u8]) -> Self;

    fn write(&self, buf: &mut BytesMut);
}

/// Encode a record array.
pub fn encode_records<R: Record>(records: &[R]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(records.len() * R::LEN);
    for record in records {
        record.write(&mut buf);
    }
    buf.to_vec()
}

/// Decode as many whole records as `bytes` holds.
pub fn decode_records<R: Record>(mut bytes: &[u8]) -> Vec<R> {
    let count = bytes.len() / R::LEN;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(R::read(&mut bytes));
    }
    records
}

// ---------------------------------------------------------------
// Device capability record
// ---------------------------------------------------------------

/// Size of the GETDEV payload.
pub const DEVICE_INFO_LEN: usize = 124;

/// How the OSNR engine bounds a channel's signal bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandwidthMode {
    /// `'T'`: bandwidth is where the spectrum falls a threshold below peak.
    Threshold,
    /// `'S'`: bandwidth is a fixed number of slices around the center.
    FixedSlices,
    /// Any other flag byte.
    Other(u8),
}

impl BandwidthMode {
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            b'T' => BandwidthMode::Threshold,
            b'S' => BandwidthMode::FixedSlices,
            other => BandwidthMode::Other(other),
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            BandwidthMode::Threshold => b'T',
            BandwidthMode::FixedSlices => b'S',
            BandwidthMode::Other(flag) => flag,
        }
    }
}

impl fmt::Display for BandwidthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flag() as char)
    }
}

/// Device capability record returned by GETDEV.
///
/// Frequencies are fixed point in units of 0.1 MHz
/// (see [`FREQ_SCALE`](crate::units::FREQ_SCALE)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub hardware_revision: u32,
    pub firmware_revision: u32,
    pub serial_number: String,
    pub manufacturing_date: String,
    pub label: String,
    pub module_id: String,
    pub max_ports: u16,
    pub max_slices: u16,
    pub max_channels: u16,
    pub bandwidth_mode: BandwidthMode,
    pub slice_width: u32,
    pub first_slice_freq: u32,
    pub capabilities: u32,
}

impl DeviceInfo {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DEVICE_INFO_LEN {
            return Err(Error::Protocol(format!(
                "device record must be {DEVICE_INFO_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = bytes;
        let hardware_revision = buf.get_u32_le();
        let firmware_revision = buf.get_u32_le();
        let serial_number = text_field(&buf[..16]);
        buf.advance(16);
        let manufacturing_date = text_field(&buf[..16]);
        buf.advance(16);
        let label = text_field(&buf[..32]);
        buf.advance(32);
        let module_id = text_field(&buf[..32]);
        buf.advance(32);
        let max_ports = buf.get_u16_le();
        let max_slices = buf.get_u16_le();
        let max_channels = buf.get_u16_le();
        let bandwidth_mode = BandwidthMode::from_flag(buf.get_u8());
        buf.advance(1);
        let slice_width = buf.get_u32_le();
        let first_slice_freq = buf.get_u32_le();
        let capabilities = buf.get_u32_le();
        Ok(DeviceInfo {
            hardware_revision,
            firmware_revision,
            serial_number,
            manufacturing_date,
            label,
            module_id,
            max_ports,
            max_slices,
            max_channels,
            bandwidth_mode,
            slice_width,
            first_slice_freq,
            capabilities,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(DEVICE_INFO_LEN);
        buf.put_u32_le(self.hardware_revision);
        buf.put_u32_le(self.firmware_revision);
        put_text(&mut buf, &self.serial_number, 16);
        put_text(&mut buf, &self.manufacturing_date, 16);
        put_text(&mut buf, &self.label, 32);
        put_text(&mut buf, &self.module_id, 32);
        buf.put_u16_le(self.max_ports);
        buf.put_u16_le(self.max_slices);
        buf.put_u16_le(self.max_channels);
        buf.put_u8(self.bandwidth_mode.flag());
        buf.put_u8(0);
        buf.put_u32_le(self.slice_width);
        buf.put_u32_le(self.first_slice_freq);
        buf.put_u32_le(self.capabilities);
        buf.to_vec()
    }

    /// Firmware revision as `major.minor.patch[rcN]`.
    pub fn firmware_version(&self) -> String {
        format_revision(self.firmware_revision)
    }

    /// Hardware revision as `major.minor.patch[rcN]`.
    pub fn hardware_version(&self) -> String {
        format_revision(self.hardware_revision)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HWR,{}", self.hardware_version())?;
        writeln!(f, "FWR,{}", self.firmware_version())?;
        writeln!(f, "SNO,{}", self.serial_number)?;
        writeln!(f, "MFD,{}", self.manufacturing_date)?;
        writeln!(f, "LBL,{}", self.label)?;
        writeln!(f, "MID,{}", self.module_id)?;
        writeln!(f, "Pmax,{}", self.max_ports)?;
        writeln!(f, "Smax,{}", self.max_slices)?;
        writeln!(f, "Nmax,{}", self.max_channels)?;
        writeln!(f, "BWXB,{}", self.bandwidth_mode)?;
        writeln!(f, "SLW,{}", self.slice_width)?;
        writeln!(f, "FSF,{}", self.first_slice_freq)?;
        write!(f, "CAP,{}", self.capabilities)
    }
}

// ---------------------------------------------------------------
// Measurement plans
// ---------------------------------------------------------------

/// One power-plan channel: an inclusive, 1-based slice range on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerPlanRecord {
    pub port: u16,
    pub start: u16,
    pub end: u16,
}

impl Record for PowerPlanRecord {
    const LEN: usize = 6;

    fn read(buf: &mut &[u8]) -> Self {
        PowerPlanRecord {
            port: buf.get_u16_le(),
            start: buf.get_u16_le(),
            end: buf.get_u16_le(),
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.start);
        buf.put_u16_le(self.end);
    }
}

/// One OSNR-plan channel.
///
/// `bandwidth_threshold` is encoded per [`BandwidthMode`]: tenths of a dB
/// below peak in threshold mode, a half-width in slices in fixed mode.
/// `rbw` uses [`RBW_SCALE`](crate::units::RBW_SCALE); the remaining
/// widths are in slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OsnrPlanRecord {
    pub port: u16,
    pub center_start: u16,
    pub center_stop: u16,
    pub bandwidth_threshold: u16,
    pub tag_range: u16,
    pub noise_lower: u16,
    pub noise_upper: u16,
    pub keepout_lower: u16,
    pub keepout_upper: u16,
    pub rbw: u16,
}

impl Record for OsnrPlanRecord {
    const LEN: usize = 20;

    fn read(buf: &mut &[u8]) -> Self {
        OsnrPlanRecord {
            port: buf.get_u16_le(),
            center_start: buf.get_u16_le(),
            center_stop: buf.get_u16_le(),
            bandwidth_threshold: buf.get_u16_le(),
            tag_range: buf.get_u16_le(),
            noise_lower: buf.get_u16_le(),
            noise_upper: buf.get_u16_le(),
            keepout_lower: buf.get_u16_le(),
            keepout_upper: buf.get_u16_le(),
            rbw: buf.get_u16_le(),
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.center_start);
        buf.put_u16_le(self.center_stop);
        buf.put_u16_le(self.bandwidth_threshold);
        buf.put_u16_le(self.tag_range);
        buf.put_u16_le(self.noise_lower);
        buf.put_u16_le(self.noise_upper);
        buf.put_u16_le(self.keepout_lower);
        buf.put_u16_le(self.keepout_upper);
        buf.put_u16_le(self.rbw);
    }
}

// ---------------------------------------------------------------
// Scan results
// ---------------------------------------------------------------

/// Size of the header in front of every result array.
pub const SCAN_HEADER_LEN: usize = 8;

/// Header of a result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanHeader {
    /// Sequence number of the plan the scan ran against.
    pub plan_sequence: u32,
    /// Module scan counter.
    pub scan: u32,
}

/// Power of one channel, tenths of a dB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerScanRecord {
    pub port: u16,
    pub start: u16,
    pub end: u16,
    pub power: i16,
}

impl Record for PowerScanRecord {
    const LEN: usize = 8;

    fn read(buf: &mut &[u8]) -> Self {
        PowerScanRecord {
            port: buf.get_u16_le(),
            start: buf.get_u16_le(),
            end: buf.get_u16_le(),
            power: buf.get_i16_le(),
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.start);
        buf.put_u16_le(self.end);
        buf.put_i16_le(self.power);
    }
}

/// OSNR result of one channel. Levels are tenths of a dB; bounds and the
/// center frequency are slice numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsnrScanRecord {
    pub port: u16,
    pub start: u16,
    pub end: u16,
    pub osnr: i16,
    pub power: i16,
    pub noise_tag_lower: u16,
    pub noise_tag_upper: u16,
    pub bandwidth_lower: u16,
    pub bandwidth_upper: u16,
    pub center: u16,
}

impl Record for OsnrScanRecord {
    const LEN: usize = 20;

    fn read(buf: &mut &[u8]) -> Self {
        OsnrScanRecord {
            port: buf.get_u16_le(),
            start: buf.get_u16_le(),
            end: buf.get_u16_le(),
            osnr: buf.get_i16_le(),
            power: buf.get_i16_le(),
            noise_tag_lower: buf.get_u16_le(),
            noise_tag_upper: buf.get_u16_le(),
            bandwidth_lower: buf.get_u16_le(),
            bandwidth_upper: buf.get_u16_le(),
            center: buf.get_u16_le(),
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.start);
        buf.put_u16_le(self.end);
        buf.put_i16_le(self.osnr);
        buf.put_i16_le(self.power);
        buf.put_u16_le(self.noise_tag_lower);
        buf.put_u16_le(self.noise_tag_upper);
        buf.put_u16_le(self.bandwidth_lower);
        buf.put_u16_le(self.bandwidth_upper);
        buf.put_u16_le(self.center);
    }
}

/// A result payload: header plus records in plan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResults<R> {
    pub header: ScanHeader,
    pub records: Vec<R>,
}

impl<R> Default for ScanResults<R> {
    fn default() -> Self {
        ScanResults {
            header: ScanHeader::default(),
            records: Vec::new(),
        }
    }
}

impl<R: Record> ScanResults<R> {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, SCAN_HEADER_LEN, "scan result header")?;
        let mut buf = bytes;
        let header = ScanHeader {
            plan_sequence: buf.get_u32_le(),
            scan: buf.get_u32_le(),
        };
        Ok(ScanResults {
            header,
            records: decode_records(buf),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(SCAN_HEADER_LEN + self.records.len() * R::LEN);
        buf.put_u32_le(self.header.plan_sequence);
        buf.put_u32_le(self.header.scan);
        for record in &self.records {
            record.write(&mut buf);
        }
        buf.to_vec()
    }
}

pub type PowerResults = ScanResults<PowerScanRecord>;
pub type OsnrResults = ScanResults<OsnrScanRecord>;

/// Human-readable dump of a payload for the opcodes whose layout is known.
pub fn describe_payload(opcode: u8, payload: &[u8]) -> Option<String> {
    let mut out = String::new();
    match Opcode::try_from(opcode).ok()? {
        Opcode::GetDevice => {
            let info = DeviceInfo::decode(payload).ok()?;
            out.push_str(&info.to_string());
        }
        Opcode::GetPowerResults => {
            let results = PowerResults::decode(payload).ok()?;
            let _ = write!(
                out,
                "MPSEQNO,{}\nSCAN,{}\nN,{}",
                results.header.plan_sequence,
                results.header.scan,
                results.records.len()
            );
            for r in &results.records {
                let _ = write!(out, "\n{},{},{},{}", r.port, r.start, r.end, r.power);
            }
        }
        Opcode::GetOsnrResults => {
            let results = OsnrResults::decode(payload).ok()?;
            let _ = write!(
                out,
                "MPSEQNO,{}\nSCAN,{}\nN,{}",
                results.header.plan_sequence,
                results.header.scan,
                results.records.len()
            );
            for r in &results.records {
                let _ = write!(
                    out,
                    "\n{},{},{},{},{},{}",
                    r.port, r.start, r.end, r.center, r.osnr, r.power
                );
            }
        }
        _ => return None,
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> DeviceInfo {
        DeviceInfo {
            hardware_revision: 0x0102_0000,
            firmware_revision: 0x0304_0502,
            serial_number: "FNS00042".into(),
            manufacturing_date: "2019-12-27".into(),
            label: "HROCM C-band".into(),
            module_id: "rack7".into(),
            max_ports: 1,
            max_slices: 15440,
            max_channels: 512,
            bandwidth_mode: BandwidthMode::Threshold,
            slice_width: 3125,
            first_slice_freq: 1_913_125_000,
            capabilities: 0x3,
        }
    }

    #[test]
    fn device_record_is_124_bytes() {
        assert_eq!(sample_device().encode().len(), DEVICE_INFO_LEN);
    }

    #[test]
    fn device_record_field_offsets() {
        let bytes = sample_device().encode();
        assert_eq!(&bytes[0..4], &0x0102_0000u32.to_le_bytes());
        assert_eq!(&bytes[8..16], b"FNS00042");
        assert_eq!(bytes[16..24], [b' '; 8]);
        assert_eq!(&bytes[106..108], &15440u16.to_le_bytes());
        assert_eq!(bytes[110], b'T');
        assert_eq!(&bytes[112..116], &3125u32.to_le_bytes());
        assert_eq!(&bytes[116..120], &1_913_125_000u32.to_le_bytes());
    }

    #[test]
    fn device_record_decodes_trimmed_text() {
        let decoded = DeviceInfo::decode(&sample_device().encode()).unwrap();
        assert_eq!(decoded, sample_device());
        assert_eq!(decoded.firmware_version(), "3.4.5rc2");
        assert_eq!(decoded.hardware_version(), "1.2.0");
    }

    #[test]
    fn device_record_wrong_size_rejected() {
        let err = DeviceInfo::decode(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn bandwidth_mode_flags() {
        assert_eq!(BandwidthMode::from_flag(b'T'), BandwidthMode::Threshold);
        assert_eq!(BandwidthMode::from_flag(b'S'), BandwidthMode::FixedSlices);
        assert_eq!(BandwidthMode::from_flag(0), BandwidthMode::Other(0));
        assert_eq!(BandwidthMode::FixedSlices.to_string(), "S");
    }

    #[test]
    fn power_plan_wire_layout() {
        let bytes = encode_records(&[PowerPlanRecord {
            port: 1,
            start: 0x0102,
            end: 0x0304,
        }]);
        assert_eq!(bytes, vec![1, 0, 0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn osnr_results_with_partial_tail() {
        let results = OsnrResults {
            header: ScanHeader {
                plan_sequence: 9,
                scan: 100,
            },
            records: vec![OsnrScanRecord {
                port: 1,
                start: 10,
                end: 25,
                osnr: 215,
                power: -123,
                noise_tag_lower: 8,
                noise_tag_upper: 27,
                bandwidth_lower: 14,
                bandwidth_upper: 21,
                center: 17,
            }],
        };
        let mut bytes = results.encode();
        assert_eq!(bytes.len(), SCAN_HEADER_LEN + OsnrScanRecord::LEN);
        bytes.extend_from_slice(&[0xAA; 5]);
        assert_eq!(OsnrResults::decode(&bytes).unwrap(), results);
    }

    #[test]
    fn scan_results_need_header() {
        assert!(PowerResults::decode(&[0u8; 7]).is_err());
        let empty = PowerResults::decode(&[0u8; 8]).unwrap();
        assert!(empty.records.is_empty());
    }

    #[test]
    fn describe_power_payload() {
        let results = PowerResults {
            header: ScanHeader {
                plan_sequence: 4,
                scan: 2,
            },
            records: vec![PowerScanRecord {
                port: 1,
                start: 1,
                end: 16,
                power: -250,
            }],
        };
        let text = describe_payload(0x0D, &results.encode()).unwrap();
        assert_eq!(text, "MPSEQNO,4\nSCAN,2\nN,1\n1,1,16,-250");
        assert!(describe_payload(0x01, &[]).is_none());
    }
}
