//! Poll engine and long-poll payload fetcher.
//!
//! The module has no interrupt line; the host learns everything by
//! clocking out an all-zero buffer and reading whatever the module has
//! staged. A header-sized poll returns the current header. A poll sized
//! to the header's declared length returns the whole reply frame, which
//! is re-read until its trailing CRC validates.

use hrocm_core::error::{Error, FrameError, Result};
use hrocm_core::transport::Transport;
use hrocm_wire::frame::{self, Header, Pipeline, HEADER_LEN};
use tracing::debug;

use crate::link::Link;

impl<T: Transport> Link<T> {
    /// Read the current header, retrying rejected frames.
    ///
    /// Makes at most [`budget`](Link::budget) exchanges. A transport
    /// failure ends the poll immediately; a rejected frame is counted and
    /// retried. Exhaustion yields [`Error::Timeout`] carrying the last
    /// rejection.
    pub async fn poll_short(&mut self) -> Result<Header> {
        let tx = [0u8; HEADER_LEN];
        let mut rx = [0u8; HEADER_LEN];
        let mut last = None;
        let mut legacy_reported = false;

        for _ in 0..self.budget {
            self.exchange(&tx, &mut rx).await?;
            match frame::validate_header(&rx) {
                Ok(header) => {
                    self.last_header = Some(header);
                    return Ok(header);
                }
                Err(error) => {
                    if error == FrameError::LegacyProtocol && !legacy_reported {
                        legacy_reported = true;
                        self.diagnostics.error(
                            "Wrong SPI protocol version: module reports version 1, expected 3",
                        );
                    }
                    self.record_frame_error(error);
                    last = Some(error);
                }
            }
        }

        Err(Error::Timeout {
            attempts: self.budget,
            last,
        })
    }

    /// Poll until the header echoes `sequence` with a settled result.
    ///
    /// If the budget runs out while the module still reports a different
    /// transaction, the error is [`Error::SequenceMismatch`].
    pub async fn wait_for_reply(&mut self, sequence: u32) -> Result<Header> {
        let mut seen = None;
        for _ in 0..self.budget {
            let header = self.poll_short().await?;
            if header.sequence == sequence && !header.is_pending() {
                return Ok(header);
            }
            seen = Some(header.sequence);
        }
        match seen {
            Some(found) if found != sequence => Err(Error::SequenceMismatch {
                expected: sequence,
                found,
            }),
            _ => Err(Error::Timeout {
                attempts: self.budget,
                last: None,
            }),
        }
    }

    /// [`wait_for_reply`](Self::wait_for_reply), then require a zero
    /// result code.
    pub async fn wait_for_success(&mut self, sequence: u32) -> Result<Header> {
        let header = self.wait_for_reply(sequence).await?;
        if header.result != 0 {
            return Err(Error::Device {
                opcode: header.opcode,
                code: header.result,
            });
        }
        Ok(header)
    }

    /// Poll until the module has finished processing whatever it last
    /// received, regardless of which transaction that was.
    pub async fn wait_command_accepted(&mut self) -> Result<Header> {
        for _ in 0..self.budget {
            let header = self.poll_short().await?;
            if !header.is_pending() {
                return Ok(header);
            }
        }
        Err(Error::Timeout {
            attempts: self.budget,
            last: None,
        })
    }

    /// Returns `true` if `header` shows `pipeline` finished `sequence`.
    pub fn is_task_complete(header: &Header, pipeline: Pipeline, sequence: u32) -> bool {
        header.completed(pipeline) == sequence
    }

    /// Poll until `pipeline` reports `sequence` as its last completed task.
    pub async fn wait_task_complete(
        &mut self,
        pipeline: Pipeline,
        sequence: u32,
    ) -> Result<Header> {
        for _ in 0..self.budget {
            let header = self.poll_short().await?;
            if Self::is_task_complete(&header, pipeline, sequence) {
                debug!(%pipeline, seq = sequence, "task complete");
                return Ok(header);
            }
        }
        Err(Error::Timeout {
            attempts: self.budget,
            last: None,
        })
    }

    /// Fetch a complete reply frame and return its header and payload.
    ///
    /// With `Some(sequence)` the reply to that command is awaited first;
    /// with `None` (or zero) a single header poll discovers the frame
    /// length. The full-length read is then repeated until the frame
    /// validates end to end.
    pub async fn poll_long(&mut self, sequence: Option<u32>) -> Result<(Header, Vec<u8>)> {
        let discovered = match sequence {
            None | Some(0) => self.poll_short().await?,
            Some(sequence) => self.wait_for_reply(sequence).await?,
        };

        if !frame::is_valid_length(discovered.length) {
            return Err(FrameError::BadLength {
                declared: discovered.length,
            }
            .into());
        }
        let length = discovered.length as usize;
        if length == HEADER_LEN {
            return Ok((discovered, Vec::new()));
        }

        let tx = vec![0u8; length];
        let mut rx = vec![0u8; length];
        let mut last = None;
        for attempt in 1..=self.budget {
            self.exchange(&tx, &mut rx).await?;
            match frame::validate_full_frame(&rx, length) {
                Ok(header) => {
                    self.last_header = Some(header);
                    let payload = frame::payload(&rx, &header).to_vec();
                    debug!(len = length, attempt, "long poll complete");
                    return Ok((header, payload));
                }
                Err(error) => {
                    self.record_frame_error(error);
                    self.diagnostics
                        .warning(format!("Long poll attempt {attempt} rejected: {error}"));
                    last = Some(error);
                }
            }
        }

        Err(Error::Timeout {
            attempts: self.budget,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::link::RetryPolicy;
    use hrocm_test_harness::MockTransport;
    use hrocm_wire::frame::{encode_frame, MAGIC_V1};

    fn link_with_budget(attempts: u32) -> Link<MockTransport> {
        let policy = RetryPolicy {
            recovery_delay: Duration::ZERO,
            attempts,
            long_attempts: attempts * 10,
        };
        Link::new(MockTransport::new(), policy, 0)
    }

    fn header(seq: u32, result: i32) -> Header {
        Header {
            result,
            ..Header::new(0x01, seq)
        }
    }

    // ---------------------------------------------------------------
    // poll_short
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn poll_short_returns_first_valid_header() {
        let mut link = link_with_budget(5);
        link.transport_mut().reply_header(&header(9, 0));
        let h = link.poll_short().await.unwrap();
        assert_eq!(h.sequence, 9);
        assert_eq!(link.transport().sent_data().len(), 1);
        assert_eq!(link.transport().sent_data()[0], vec![0u8; HEADER_LEN]);
        assert_eq!(link.last_header().unwrap().sequence, 9);
    }

    #[tokio::test]
    async fn poll_short_times_out_after_exactly_budget_exchanges() {
        let mut link = link_with_budget(37);
        link.transport_mut().set_idle_reply(&[0xFF; HEADER_LEN]);

        let err = link.poll_short().await.unwrap_err();
        match err {
            Error::Timeout { attempts, last } => {
                assert_eq!(attempts, 37);
                assert_eq!(last, Some(FrameError::MagicAllOnes));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(link.transport().sent_data().len(), 37);
        assert_eq!(link.counters().magic_errors, 37);
    }

    #[tokio::test]
    async fn poll_short_counts_each_failure_class() {
        let mut link = link_with_budget(10);
        let mut corrupt = encode_frame(&header(1, 0), &[]).unwrap();
        corrupt[9] ^= 0x10;
        let mut wrong_magic = header(1, 0);
        wrong_magic.magic = 0x1234_5678;

        link.transport_mut().reply_all_ones();
        link.transport_mut().reply(&corrupt);
        link.transport_mut().reply(&encode_frame(&wrong_magic, &[]).unwrap());
        link.transport_mut().reply_header(&header(2, 0));

        assert_eq!(link.poll_short().await.unwrap().sequence, 2);
        let counters = link.counters();
        assert_eq!(counters.magic_errors, 2);
        assert_eq!(counters.header_crc_errors, 1);
    }

    #[tokio::test]
    async fn poll_short_stops_on_transport_failure() {
        let mut link = link_with_budget(10);
        link.transport_mut().reply_all_ones();
        link.transport_mut().reply_failure("spi adapter gone");
        let err = link.poll_short().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(link.transport().sent_data().len(), 2);
    }

    #[tokio::test]
    async fn legacy_protocol_is_diagnosed_once() {
        let mut link = link_with_budget(3);
        let legacy = Header {
            magic: MAGIC_V1,
            ..header(1, 0)
        };
        link.transport_mut()
            .set_idle_reply(&encode_frame(&legacy, &[]).unwrap());

        let err = link.poll_short().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                last: Some(FrameError::LegacyProtocol),
                ..
            }
        ));
        assert_eq!(link.diagnostics().len(), 1);
        assert!(link.diagnostics().entries()[0]
            .message
            .contains("protocol version"));
    }

    // ---------------------------------------------------------------
    // Waits
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn wait_for_reply_skips_pending_and_stale_headers() {
        let mut link = link_with_budget(10);
        link.transport_mut().reply_header(&header(4, 0));
        link.transport_mut().reply_header(&header(5, -1));
        link.transport_mut().reply_header(&header(5, 0));
        assert_eq!(link.wait_for_reply(5).await.unwrap().sequence, 5);
        assert_eq!(link.transport().sent_data().len(), 3);
    }

    #[tokio::test]
    async fn wait_for_reply_reports_persistent_mismatch() {
        let mut link = link_with_budget(4);
        link.transport_mut()
            .set_idle_reply(&encode_frame(&header(3, 0), &[]).unwrap());
        let err = link.wait_for_reply(8).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceMismatch {
                expected: 8,
                found: 3
            }
        ));
    }

    #[tokio::test]
    async fn wait_for_reply_times_out_while_pending() {
        let mut link = link_with_budget(4);
        link.transport_mut()
            .set_idle_reply(&encode_frame(&header(8, -1), &[]).unwrap());
        let err = link.wait_for_reply(8).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 4, last: None }));
    }

    #[tokio::test]
    async fn wait_for_success_surfaces_device_error() {
        let mut link = link_with_budget(4);
        link.transport_mut().reply_header(&header(6, 17));
        let err = link.wait_for_success(6).await.unwrap_err();
        assert!(matches!(err, Error::Device { opcode: 0x01, code: 17 }));
    }

    #[tokio::test]
    async fn wait_task_complete_watches_seqarr() {
        let mut link = link_with_budget(5);
        let mut done = header(20, 0);
        done.seqarr[Pipeline::Osnr.index()] = 20;
        link.transport_mut().reply_header(&header(20, 0));
        link.transport_mut().reply_header(&done);
        let h = link.wait_task_complete(Pipeline::Osnr, 20).await.unwrap();
        assert_eq!(h.completed(Pipeline::Osnr), 20);
    }

    // ---------------------------------------------------------------
    // poll_long
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn poll_long_retries_until_full_crc_validates() {
        let mut link = link_with_budget(10);
        let reply = encode_frame(&header(7, 0), &[1, 2, 3, 4, 5, 6]).unwrap();
        let mut damaged = reply.clone();
        damaged[HEADER_LEN + 2] ^= 0xFF;

        link.transport_mut().reply(&reply); // discovery
        link.transport_mut().reply(&damaged);
        link.transport_mut().reply(&reply);

        let (h, payload) = link.poll_long(Some(7)).await.unwrap();
        assert_eq!(h.sequence, 7);
        assert_eq!(payload, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(link.counters().frame_crc_errors, 1);
        assert_eq!(link.diagnostics().len(), 1);

        let sent = link.transport().sent_data();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].len(), HEADER_LEN);
        assert_eq!(sent[1].len(), reply.len());
        assert!(sent[2].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn poll_long_without_sequence_uses_current_header() {
        let mut link = link_with_budget(10);
        let reply = encode_frame(&header(99, 0), &[0xAB; 10]).unwrap();
        link.transport_mut().reply(&reply);
        link.transport_mut().reply(&reply);
        let (h, payload) = link.poll_long(None).await.unwrap();
        assert_eq!(h.sequence, 99);
        assert_eq!(payload, vec![0xAB; 10]);
    }

    #[tokio::test]
    async fn poll_long_header_only_reply_has_empty_payload() {
        let mut link = link_with_budget(10);
        link.transport_mut().reply_header(&header(5, 0));
        let (_, payload) = link.poll_long(Some(5)).await.unwrap();
        assert!(payload.is_empty());
        assert_eq!(link.transport().sent_data().len(), 1);
    }

    #[tokio::test]
    async fn poll_long_length_change_counts_as_frame_error() {
        let mut link = link_with_budget(10);
        let first = encode_frame(&header(5, 0), &[1; 8]).unwrap();
        let longer = encode_frame(&header(5, 0), &[1; 12]).unwrap();
        link.transport_mut().reply(&first);
        link.transport_mut().reply(&longer);
        link.transport_mut().reply(&first);
        let (_, payload) = link.poll_long(Some(5)).await.unwrap();
        assert_eq!(payload.len(), 8);
        assert_eq!(link.counters().frame_crc_errors, 1);
    }

    #[tokio::test]
    async fn poll_long_times_out_with_last_reason() {
        let mut link = link_with_budget(3);
        let reply = encode_frame(&header(5, 0), &[1; 8]).unwrap();
        let mut damaged = reply.clone();
        damaged[HEADER_LEN] ^= 1;
        link.transport_mut().reply(&reply);
        link.transport_mut().set_idle_reply(&damaged);

        let err = link.poll_long(Some(5)).await.unwrap_err();
        match err {
            Error::Timeout { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, Some(FrameError::FullCrcMismatch { .. })));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(link.transport().sent_data().len(), 4);
    }
}
