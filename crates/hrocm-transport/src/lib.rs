//! Transport wrappers for the HROCM driver.
//!
//! The physical SPI adapter is supplied by the caller as any
//! [`Transport`](hrocm_core::Transport). This crate adds:
//!
//! - [`BinLogTransport`]: records every exchange to a binary log
//! - [`ReplayTransport`]: answers from a previously recorded log
//!
//! # Example
//!
//! ```
//! use hrocm_transport::{read_records, BinLogTransport, SharedSink};
//! use hrocm_test_harness::MockTransport;
//! use hrocm_core::transport::Transport;
//!
//! # async fn example() -> hrocm_core::Result<()> {
//! let mut mock = MockTransport::new();
//! mock.reply(&[0u8; 64]);
//! let sink = SharedSink::new();
//! let mut transport = BinLogTransport::new(mock, sink.clone());
//!
//! let mut rx = [0u8; 64];
//! transport.transfer(&[0u8; 64], &mut rx).await?;
//!
//! let records = read_records(&sink.contents()[..])?;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod binlog;
pub mod replay;

pub use binlog::{
    parse_records, read_records, BinLogRecord, BinLogTransport, SharedSink, BINLOG_MAGIC,
};
pub use replay::ReplayTransport;
