//! # hrocm -- High-Resolution Optical Channel Monitor driver
//!
//! `hrocm` is an asynchronous Rust library for driving high-resolution
//! optical channel monitor modules over a polled SPI link. It uploads
//! channel plans, triggers power and OSNR scans, and returns per-channel
//! results in physical units.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hrocm::{ChannelPlan, HrocmBuilder, OsnrParameters, Transport, VectorKey};
//!
//! # async fn example(adapter: Box<dyn Transport>) -> anyhow::Result<()> {
//! let mut device = HrocmBuilder::new().build_with_transport(adapter).await?;
//! device.ensure_initialized().await?;
//!
//! let grid = device.grid()?;
//! let plan = ChannelPlan::itu(&grid, 191.35, 0.05, 96, Some(&OsnrParameters::default()))?;
//! device.set_channel_plan(plan).await?;
//!
//! device.run_full_scan().await?;
//! for (f, p) in device
//!     .get_vector(VectorKey::ScanCenter)
//!     .await?
//!     .iter()
//!     .zip(device.get_vector(VectorKey::ScanPower).await?)
//! {
//!     println!("{f:.4} THz  {p:6.1} dBm");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                           |
//! |-----------------------|---------------------------------------------------|
//! | `hrocm-core`          | [`Transport`] trait, errors, diagnostics log      |
//! | `hrocm-wire`          | Frame codec, payload records, unit conversion     |
//! | `hrocm-transport`     | Binary exchange log: recorder, reader, replay     |
//! | `hrocm-device`        | Protocol engine, channel plans, [`HrocmDevice`]   |
//! | `hrocm-test-harness`  | Scripted mock and simulated module for tests      |
//! | **`hrocm`**           | This facade crate -- re-exports everything        |
//!
//! ## Transports
//!
//! The library does not ship an SPI adapter driver. Implement
//! [`Transport`] for your adapter: each `transfer` shifts out `tx` and
//! shifts in an `rx` of the same length. Wrap it in a
//! [`BinLogTransport`](transport::BinLogTransport) (or use
//! [`HrocmBuilder::exchange_log`]) to record every exchange for offline
//! analysis, and feed a recorded log to
//! [`ReplayTransport`](transport::ReplayTransport) to reproduce a session.
//!
//! ## Diagnostics
//!
//! Every failed operation returns an [`Error`] and also appends an entry to
//! the session's diagnostics log, drained with
//! [`HrocmDevice::take_last_error`]. Link-level recoveries (bad magic, CRC
//! failures, retransmits) are counted in [`LinkCounters`]. Structured
//! logging goes through `tracing`; install a subscriber to see it.

pub use hrocm_core::*;

pub use hrocm_device::{
    ChannelPlan, HrocmBuilder, HrocmDevice, NumericKey, OsnrParameters, RetryPolicy, ScanData,
    ScanStatus, TextKey, VectorKey,
};

/// Wire format: frames, opcodes, payload records, units.
pub mod wire {
    pub use hrocm_wire::*;
}

/// Binary exchange log and replay.
pub mod transport {
    pub use hrocm_transport::*;
}

/// Protocol engine and session internals.
pub mod device {
    pub use hrocm_device::*;
}
