//! Binary exchange log.
//!
//! Every exchange is appended as one record:
//!
//! ```text
//! u32 magic = 0xBEEFBEEF
//! u32 tick_ms       milliseconds since the log was opened (wraps)
//! u32 result        0 = transfer ok, 1 = transfer failed
//! u32 length        bytes per direction
//! u8  tx[length]
//! u8  rx[length]
//! ```
//!
//! All integers are little-endian. Failed transfers are logged too, with
//! whatever the receive buffer held when the adapter gave up.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use tokio::time::Instant;

/// Marker at the start of every record.
pub const BINLOG_MAGIC: u32 = 0xBEEF_BEEF;

const RECORD_HEADER_LEN: usize = 16;

/// One logged exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinLogRecord {
    pub tick_ms: u32,
    /// `true` if the adapter reported success.
    pub ok: bool,
    pub tx: Vec<u8>,
    pub rx: Vec<u8>,
}

impl BinLogRecord {
    /// Encode the record. `rx` is truncated or zero-padded to `tx.len()`.
    pub fn encode(&self) -> Vec<u8> {
        let length = self.tx.len();
        let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + 2 * length);
        buf.put_u32_le(BINLOG_MAGIC);
        buf.put_u32_le(self.tick_ms);
        buf.put_u32_le(if self.ok { 0 } else { 1 });
        buf.put_u32_le(length as u32);
        buf.put_slice(&self.tx);
        let n = self.rx.len().min(length);
        buf.put_slice(&self.rx[..n]);
        buf.put_bytes(0, length - n);
        buf.to_vec()
    }
}

impl fmt::Display for BinLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={}ms {} len={}",
            self.tick_ms,
            if self.ok { "ok" } else { "FAIL" },
            self.tx.len()
        )
    }
}

/// Parse a complete log image.
pub fn parse_records(mut bytes: &[u8]) -> Result<Vec<BinLogRecord>> {
    let total = bytes.len();
    let mut records = Vec::new();
    while bytes.has_remaining() {
        let offset = total - bytes.remaining();
        if bytes.remaining() < RECORD_HEADER_LEN {
            return Err(Error::Protocol(format!(
                "truncated log record header at offset {offset}"
            )));
        }
        let magic = bytes.get_u32_le();
        if magic != BINLOG_MAGIC {
            return Err(Error::Protocol(format!(
                "bad log record magic {magic:#010X} at offset {offset}"
            )));
        }
        let tick_ms = bytes.get_u32_le();
        let result = bytes.get_u32_le();
        let length = bytes.get_u32_le() as usize;
        if bytes.remaining() < 2 * length {
            return Err(Error::Protocol(format!(
                "truncated log record at offset {offset}: need {} bytes, have {}",
                2 * length,
                bytes.remaining()
            )));
        }
        let tx = bytes[..length].to_vec();
        let rx = bytes[length..2 * length].to_vec();
        bytes.advance(2 * length);
        records.push(BinLogRecord {
            tick_ms,
            ok: result == 0,
            tx,
            rx,
        });
    }
    Ok(records)
}

/// Read every record from `reader`.
pub fn read_records(mut reader: impl Read) -> Result<Vec<BinLogRecord>> {
    let mut image = Vec::new();
    reader.read_to_end(&mut image)?;
    parse_records(&image)
}

/// An in-memory log sink that can be inspected while a transport owns it.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        match self.buf.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Write for SharedSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| std::io::Error::other("log sink poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A [`Transport`] wrapper that records every exchange of `inner`.
///
/// Write errors on the sink are reported through `tracing` and otherwise
/// ignored so a full disk never breaks the link.
pub struct BinLogTransport<T, W> {
    inner: T,
    sink: W,
    started: Instant,
    records: u64,
}

impl<T: Transport, W: Write + Send + Sync> BinLogTransport<T, W> {
    pub fn new(inner: T, sink: W) -> Self {
        BinLogTransport {
            inner,
            sink,
            started: Instant::now(),
            records: 0,
        }
    }

    /// Number of records written.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> (T, W) {
        (self.inner, self.sink)
    }

    fn append(&mut self, record: &BinLogRecord) {
        let result = self
            .sink
            .write_all(&record.encode())
            .and_then(|()| self.sink.flush());
        match result {
            Ok(()) => self.records += 1,
            Err(e) => tracing::warn!(error = %e, "failed to append exchange log record"),
        }
    }
}

#[async_trait]
impl<T: Transport, W: Write + Send + Sync> Transport for BinLogTransport<T, W> {
    async fn open(&mut self) -> Result<()> {
        self.inner.open().await
    }

    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let outcome = self.inner.transfer(tx, rx).await;
        let tick_ms = (self.started.elapsed().as_millis() & u128::from(u32::MAX)) as u32;
        let record = BinLogRecord {
            tick_ms,
            ok: outcome.is_ok(),
            tx: tx.to_vec(),
            rx: rx.to_vec(),
        };
        self.append(&record);
        outcome
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

impl<T, W> fmt::Debug for BinLogTransport<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinLogTransport")
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}
