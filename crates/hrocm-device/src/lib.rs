//! HROCM protocol engine and device session.
//!
//! This crate drives an HROCM module over any [`Transport`](hrocm_core::Transport).
//! It provides:
//!
//! - **Link** ([`link`]) -- one transport, the sequence counter, the retry
//!   budget and the mandatory recovery delay after every exchange.
//! - **Poll engine** ([`poll`]) -- header polls, waits on sequence numbers
//!   and pipeline completion, and the long poll that fetches reply
//!   payloads.
//! - **Dispatcher** ([`dispatch`]) -- the fire-and-confirm and
//!   transmit-with-retransmit command shapes.
//! - **Commands** ([`commands`]) -- typed wrappers for every opcode.
//! - **Plans and results** ([`plan`], [`tracker`], [`postprocess`]) --
//!   channel plan builders and validation, scan task tracking, peak-power
//!   derivation from a high-resolution section.
//! - **Named attributes** ([`attributes`]) -- numeric, text and vector keys
//!   for host tooling.
//! - **Session** ([`device`], [`builder`]) -- the [`HrocmDevice`] façade and
//!   its [`HrocmBuilder`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use hrocm_device::{ChannelPlan, HrocmBuilder, VectorKey};
//! use hrocm_test_harness::SimulatedModule;
//!
//! # async fn example() -> hrocm_core::Result<()> {
//! let sim = SimulatedModule::with_grid(1_913_500_000, 500_000, 80);
//! let mut device = HrocmBuilder::new()
//!     .recovery_delay(Duration::ZERO)
//!     .build_with_transport(Box::new(sim))
//!     .await?;
//!
//! device.ensure_initialized().await?;
//! let grid = device.grid()?;
//! let plan = ChannelPlan::itu(&grid, 191.40, 0.1, 20, None)?;
//! device.set_channel_plan(plan).await?;
//!
//! device.run_full_scan().await?;
//! let power = device.get_vector(VectorKey::ScanPower).await?;
//! assert_eq!(power.len(), 20);
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod builder;
pub mod commands;
pub mod device;
pub mod dispatch;
pub mod link;
pub mod plan;
pub mod poll;
pub mod postprocess;
pub mod tracker;

pub use attributes::{NumericKey, TextKey, VectorKey};
pub use builder::HrocmBuilder;
pub use device::HrocmDevice;
pub use link::{Link, RetryPolicy};
pub use plan::{ChannelPlan, OsnrParameters};
pub use postprocess::ScanData;
pub use tracker::{ScanStatus, TaskTracker};
