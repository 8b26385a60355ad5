//! hrocm-core: Core traits, error definitions, and diagnostics for the
//! HROCM driver.
//!
//! This crate defines the pieces every other crate in the workspace shares:
//! the byte-level link to the module, the error taxonomy, and the
//! session-owned diagnostic log. It has no knowledge of the wire format.
//!
//! # Key types
//!
//! - [`Transport`] -- fixed-length full-duplex exchange with the module
//! - [`Error`] / [`FrameError`] / [`Result`] -- error handling
//! - [`Diagnostics`] -- drainable ERROR/WARNING log with source locations
//! - [`LinkCounters`] -- magic, CRC and retransmit counters

pub mod diagnostics;
pub mod error;
pub mod helpers;
pub mod transport;

pub use diagnostics::{DiagnosticEntry, Diagnostics, LinkCounters, Severity};
pub use error::{Error, FrameError, Result};
pub use helpers::{format_freq_thz, format_revision, text_field};
pub use transport::Transport;
