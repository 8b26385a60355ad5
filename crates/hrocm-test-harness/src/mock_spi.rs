//! Scripted SPI transport for deterministic protocol tests.
//!
//! [`MockTransport`] implements the [`Transport`] trait with a queue of
//! pre-loaded replies. Each `transfer()` records the transmit buffer and
//! copies the next reply into the receive buffer, truncated or zero-padded
//! to the exchange length, exactly as an SPI adapter would clock it in.
//!
//! # Example
//!
//! ```
//! use hrocm_test_harness::MockTransport;
//! use hrocm_wire::Header;
//!
//! let mut mock = MockTransport::new();
//! mock.reply_header(&Header::new(0x01, 5));
//! mock.reply_all_ones();
//! assert_eq!(mock.remaining_replies(), 2);
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use hrocm_wire::frame::{encode_frame, Header};

/// One scripted exchange outcome.
#[derive(Debug, Clone)]
enum Reply {
    Bytes(Vec<u8>),
    Fail(String),
}

/// A mock [`Transport`] for testing protocol engines without hardware.
///
/// Replies are consumed in order. When the queue is exhausted the idle
/// reply is repeated if one is set; otherwise the exchange fails.
#[derive(Debug)]
pub struct MockTransport {
    replies: VecDeque<Reply>,
    idle: Option<Vec<u8>>,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            replies: VecDeque::new(),
            idle: None,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Queue raw bytes for the next unanswered exchange.
    pub fn reply(&mut self, bytes: &[u8]) {
        self.replies.push_back(Reply::Bytes(bytes.to_vec()));
    }

    /// Queue a header-only frame.
    pub fn reply_header(&mut self, header: &Header) {
        self.reply_frame(header, &[]);
    }

    /// Queue a frame carrying `payload`.
    pub fn reply_frame(&mut self, header: &Header, payload: &[u8]) {
        match encode_frame(header, payload) {
            Ok(frame) => self.reply(&frame),
            Err(e) => self.reply_failure(&format!("unencodable scripted frame: {e}")),
        }
    }

    /// Queue the bus pattern of an unpowered module.
    pub fn reply_all_ones(&mut self) {
        self.replies.push_back(Reply::Bytes(vec![0xFF; 64]));
    }

    /// Queue an adapter-level failure.
    pub fn reply_failure(&mut self, message: &str) {
        self.replies.push_back(Reply::Fail(message.to_string()));
    }

    /// Reply used once the queue is empty.
    pub fn set_idle_reply(&mut self, bytes: &[u8]) {
        self.idle = Some(bytes.to_vec());
    }

    /// Return every transmit buffer sent so far, one element per exchange.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Return the number of scripted replies not yet consumed.
    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `transfer()` calls will return
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.sent_log.push(tx.to_vec());

        let bytes = match self.replies.pop_front() {
            Some(Reply::Bytes(bytes)) => bytes,
            Some(Reply::Fail(message)) => return Err(Error::Transport(message)),
            None => match &self.idle {
                Some(bytes) => bytes.clone(),
                None => {
                    return Err(Error::Transport(
                        "no more replies in mock transport".into(),
                    ))
                }
            },
        };

        rx.fill(0);
        let n = bytes.len().min(rx.len());
        rx[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
