//! Command dispatcher.
//!
//! Two command shapes exist on the wire:
//!
//! - **Fire and confirm**: the frame is sent once and the host waits for
//!   the same sequence number to come back with a zero result. Used for
//!   everything that is cheap for the module to process.
//! - **Transmit with retransmit**: for commands the module may miss while
//!   busy with a scan cycle (TPC, SETMPPW, SETMPOSNR). Once the module
//!   settles, a header still echoing an older sequence number means the
//!   frame was not taken, and the identical frame is sent again.
//!
//! Both shapes take a fresh sequence number per command.

use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use hrocm_wire::frame::{encode_command, Header};
use hrocm_wire::Opcode;
use tracing::debug;

use crate::link::Link;

impl<T: Transport> Link<T> {
    /// Encode and transmit one command frame, returning its sequence
    /// number.
    pub async fn send_command(&mut self, opcode: Opcode, payload: &[u8]) -> Result<u32> {
        let sequence = self.next_sequence();
        let frame = encode_command(opcode, sequence, payload)?;
        let mut rx = vec![0u8; frame.len()];
        debug!(%opcode, seq = sequence, len = frame.len(), "sending command");
        self.exchange(&frame, &mut rx).await?;
        Ok(sequence)
    }

    /// Send `opcode` once and wait for it to complete successfully.
    pub async fn fire_and_confirm(&mut self, opcode: Opcode, payload: &[u8]) -> Result<Header> {
        let sequence = self.send_command(opcode, payload).await?;
        self.wait_for_success(sequence).await
    }

    /// Send `opcode`, re-sending the identical frame while the module
    /// reports an older transaction.
    ///
    /// The number of transmissions is bounded by the link's budget.
    pub async fn transmit_with_retransmit(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<Header> {
        let sequence = self.next_sequence();
        let frame = encode_command(opcode, sequence, payload)?;
        let mut rx = vec![0u8; frame.len()];

        for attempt in 0..self.budget {
            if attempt > 0 {
                self.counters.retransmits += 1;
                self.diagnostics
                    .warning(format!("Retransmitting {opcode} command (seq {sequence})"));
            }
            debug!(%opcode, seq = sequence, attempt, "sending command");
            self.exchange(&frame, &mut rx).await?;

            let header = self.wait_command_accepted().await?;
            if header.sequence != sequence {
                debug!(
                    %opcode,
                    expected = sequence,
                    found = header.sequence,
                    "command not taken"
                );
                continue;
            }
            if header.result > 0 {
                return Err(Error::Device {
                    opcode: header.opcode,
                    code: header.result,
                });
            }
            return Ok(header);
        }

        Err(Error::Timeout {
            attempts: self.budget,
            last: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::link::RetryPolicy;
    use hrocm_test_harness::MockTransport;
    use hrocm_wire::frame::{validate_full_frame, HEADER_LEN};

    fn link(attempts: u32, initial: u32) -> Link<MockTransport> {
        let policy = RetryPolicy {
            recovery_delay: Duration::ZERO,
            attempts,
            long_attempts: attempts,
        };
        Link::new(MockTransport::new(), policy, initial)
    }

    fn reply(opcode: Opcode, seq: u32, result: i32) -> Header {
        Header {
            result,
            ..Header::new(opcode.code(), seq)
        }
    }

    #[tokio::test]
    async fn fire_and_confirm_sends_once() {
        let mut link = link(10, 99);
        link.transport_mut().reply_header(&reply(Opcode::Nop, 98, 0)); // command slot
        link.transport_mut().reply_header(&reply(Opcode::Nop, 100, -1));
        link.transport_mut().reply_header(&reply(Opcode::Nop, 100, 0));

        let h = link.fire_and_confirm(Opcode::Nop, &[]).await.unwrap();
        assert_eq!(h.sequence, 100);

        let sent = link.transport().sent_data();
        assert_eq!(sent.len(), 3);
        let cmd = validate_full_frame(&sent[0], sent[0].len()).unwrap();
        assert_eq!(cmd.opcode, Opcode::Nop.code());
        assert_eq!(cmd.sequence, 100);
        assert!(sent[1..].iter().all(|tx| tx.iter().all(|&b| b == 0)));
    }

    #[tokio::test]
    async fn fire_and_confirm_reports_device_error() {
        let mut link = link(10, 0);
        link.transport_mut().reply_header(&reply(Opcode::Nop, 0, 0));
        link.transport_mut().reply_header(&reply(Opcode::ClearErrors, 1, 3));
        let err = link.fire_and_confirm(Opcode::ClearErrors, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Device { opcode: 0x04, code: 3 }));
        assert_eq!(link.transport().sent_data().len(), 2);
    }

    #[tokio::test]
    async fn retransmits_exactly_once_on_stale_sequence() {
        let mut link = link(10, 500);
        let mask = 1u32.to_le_bytes();

        link.transport_mut().reply_header(&reply(Opcode::Nop, 400, 0)); // first send
        link.transport_mut().reply_header(&reply(Opcode::Nop, 400, 0)); // stale
        link.transport_mut().reply_header(&reply(Opcode::Nop, 400, 0)); // second send
        link.transport_mut()
            .reply_header(&reply(Opcode::TriggerProcess, 501, 0));

        let h = link
            .transmit_with_retransmit(Opcode::TriggerProcess, &mask)
            .await
            .unwrap();
        assert_eq!(h.sequence, 501);
        assert_eq!(link.counters().retransmits, 1);

        let sent = link.transport().sent_data();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], sent[2], "retransmitted frame must be identical");
        assert_eq!(sent[0].len(), HEADER_LEN + 4 + 4);
        assert!(link.diagnostics().entries()[0]
            .message
            .contains("Retransmitting TPC command"));
    }

    #[tokio::test]
    async fn retransmit_waits_out_pending_before_deciding() {
        let mut link = link(10, 7);
        link.transport_mut().reply_header(&reply(Opcode::Nop, 1, 0));
        link.transport_mut().reply_header(&reply(Opcode::Nop, 1, -1));
        link.transport_mut()
            .reply_header(&reply(Opcode::SetPowerPlan, 8, 0));
        link.transmit_with_retransmit(Opcode::SetPowerPlan, &[0; 6])
            .await
            .unwrap();
        assert_eq!(link.counters().retransmits, 0);
    }

    #[tokio::test]
    async fn retransmit_fails_on_matching_error_code() {
        let mut link = link(10, 7);
        link.transport_mut().reply_header(&reply(Opcode::Nop, 1, 0));
        link.transport_mut()
            .reply_header(&reply(Opcode::SetOsnrPlan, 8, 4));
        let err = link
            .transmit_with_retransmit(Opcode::SetOsnrPlan, &[0; 20])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Device { opcode: 0x14, code: 4 }));
        assert_eq!(link.counters().retransmits, 0);
    }

    #[tokio::test]
    async fn stale_error_code_is_retransmitted_not_fatal() {
        let mut link = link(10, 7);
        link.transport_mut().reply_header(&reply(Opcode::Nop, 1, 0));
        link.transport_mut().reply_header(&reply(Opcode::Nop, 1, 9));
        link.transport_mut().reply_header(&reply(Opcode::Nop, 1, 9));
        link.transport_mut()
            .reply_header(&reply(Opcode::TriggerProcess, 8, 0));
        link.transmit_with_retransmit(Opcode::TriggerProcess, &[1, 0, 0, 0])
            .await
            .unwrap();
        assert_eq!(link.counters().retransmits, 1);
    }

    #[tokio::test]
    async fn wedged_module_times_out() {
        let mut link = link(3, 7);
        let idle = hrocm_wire::frame::encode_frame(&reply(Opcode::Nop, 1, 0), &[]).unwrap();
        link.transport_mut().set_idle_reply(&idle);
        let err = link
            .transmit_with_retransmit(Opcode::TriggerProcess, &[1, 0, 0, 0])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 3, .. }));
        assert_eq!(link.counters().retransmits, 2);
        // three sends, each followed by one settled poll
        assert_eq!(link.transport().sent_data().len(), 6);
    }
}
