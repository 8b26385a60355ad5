//! Replay a recorded exchange log as a transport.
//!
//! [`ReplayTransport`] feeds back the receive buffers of a log written by
//! [`BinLogTransport`](crate::BinLogTransport), one per exchange, so a
//! captured session can be re-run through the driver offline.

use std::collections::VecDeque;

use async_trait::async_trait;
use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;

use crate::binlog::BinLogRecord;

/// A [`Transport`] answering from recorded exchanges.
///
/// In strict mode every transmit buffer must match the recorded one;
/// otherwise differences are only traced.
#[derive(Debug)]
pub struct ReplayTransport {
    records: VecDeque<BinLogRecord>,
    strict: bool,
    connected: bool,
    position: usize,
}

impl ReplayTransport {
    pub fn new(records: Vec<BinLogRecord>) -> Self {
        ReplayTransport {
            records: records.into(),
            strict: false,
            connected: true,
            position: 0,
        }
    }

    /// Fail on the first transmit buffer that differs from the log.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Records not yet replayed.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn open(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let record = self
            .records
            .pop_front()
            .ok_or_else(|| Error::Transport("replay log exhausted".into()))?;
        let index = self.position;
        self.position += 1;

        if record.tx != tx {
            if self.strict {
                return Err(Error::Protocol(format!(
                    "replay diverged at exchange {index}: recorded {} bytes, sent {}",
                    record.tx.len(),
                    tx.len()
                )));
            }
            tracing::trace!(index, "replayed exchange differs from recorded transmit buffer");
        }

        rx.fill(0);
        let n = record.rx.len().min(rx.len());
        rx[..n].copy_from_slice(&record.rx[..n]);

        if record.ok {
            Ok(())
        } else {
            Err(Error::Transport(format!("recorded transfer failure at exchange {index}")))
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
