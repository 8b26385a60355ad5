//! hrocm-wire: Wire format of the HROCM SPI protocol (version 3).
//!
//! This crate is pure: it builds and validates frames, decodes payload
//! records, and converts between slice numbers and physical units. It
//! performs no I/O, so it can be exercised byte for byte in tests.
//!
//! # Modules
//!
//! - [`frame`] -- header layout, CRC-32 framing, validation
//! - [`opcode`] -- command opcodes and attribute selectors
//! - [`records`] -- capability record, measurement plans, scan results
//! - [`units`] -- fixed-point scales and the slice grid

pub mod frame;
pub mod opcode;
pub mod records;
pub mod units;

pub use frame::{Header, Pipeline};
pub use opcode::{Attribute, Opcode};
pub use records::{
    BandwidthMode, DeviceInfo, OsnrPlanRecord, OsnrResults, OsnrScanRecord, PowerPlanRecord,
    PowerResults, PowerScanRecord, ScanHeader, ScanResults,
};
pub use units::SliceGrid;
