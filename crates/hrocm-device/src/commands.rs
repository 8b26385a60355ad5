//! Typed module commands.
//!
//! Each function here picks the right dispatch shape for its opcode,
//! encodes the payload and, where the command returns data, fetches and
//! decodes the reply frame.

use bytes::{Buf, BufMut, BytesMut};
use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use hrocm_wire::frame::{Header, HEADER_LEN, MAX_TRANSFER_LEN};
use hrocm_wire::records::{
    decode_records, encode_records, DeviceInfo, OsnrPlanRecord, OsnrResults, PowerPlanRecord,
    PowerResults, DEVICE_INFO_LEN,
};
use hrocm_wire::{Attribute, Opcode};
use tracing::debug;

use crate::link::Link;

/// Largest module id MID accepts.
pub const MODULE_ID_LEN: usize = 32;

/// Firmware bytes carried per FWT frame: a full transfer minus the header,
/// the chunk offset and the trailing CRC.
pub const FIRMWARE_CHUNK_LEN: usize = MAX_TRANSFER_LEN - HEADER_LEN - 8;

fn response_error(header: &Header, payload: &[u8]) -> Error {
    Error::Protocol(format!(
        "Response error: OPCODE={} RDATA.size={}",
        hrocm_wire::opcode::describe(header.opcode),
        payload.len()
    ))
}

fn check_reply(header: &Header, payload: &[u8], opcode: Opcode, len: Option<usize>) -> Result<()> {
    let length_ok = len.map_or(true, |len| payload.len() == len);
    if header.opcode != opcode.code() || !length_ok {
        return Err(response_error(header, payload));
    }
    Ok(())
}

impl<T: Transport> Link<T> {
    // ---------------------------------------------------------------
    // Housekeeping
    // ---------------------------------------------------------------

    /// Round trip with no effect on the module.
    pub async fn nop(&mut self) -> Result<Header> {
        self.fire_and_confirm(Opcode::Nop, &[]).await
    }

    /// Clear latched hardware errors.
    pub async fn clear_errors(&mut self) -> Result<Header> {
        self.fire_and_confirm(Opcode::ClearErrors, &[]).await
    }

    /// Reset the module. Callers should widen the budget first.
    pub async fn reset(&mut self) -> Result<Header> {
        self.fire_and_confirm(Opcode::Reset, &[]).await
    }

    /// Store a new user-assigned module id.
    pub async fn set_module_id(&mut self, id: &str) -> Result<Header> {
        if id.len() > MODULE_ID_LEN {
            return Err(Error::InvalidParameter(format!(
                "module id is {} bytes, at most {MODULE_ID_LEN} allowed",
                id.len()
            )));
        }
        self.fire_and_confirm(Opcode::ModuleId, id.as_bytes()).await
    }

    // ---------------------------------------------------------------
    // Capability record
    // ---------------------------------------------------------------

    /// Issue GETDEV and decode the capability record.
    pub async fn get_device(&mut self) -> Result<(Header, DeviceInfo)> {
        let header = self.fire_and_confirm(Opcode::GetDevice, &[]).await?;
        let (header, payload) = self.poll_long(Some(header.sequence)).await?;
        check_reply(&header, &payload, Opcode::GetDevice, Some(DEVICE_INFO_LEN))?;
        Ok((header, DeviceInfo::decode(&payload)?))
    }

    // ---------------------------------------------------------------
    // Scans and plans
    // ---------------------------------------------------------------

    /// Start the pipelines selected by `mask`. Returns the trigger's
    /// sequence number.
    pub async fn trigger(&mut self, mask: u32) -> Result<u32> {
        let header = self
            .transmit_with_retransmit(Opcode::TriggerProcess, &mask.to_le_bytes())
            .await?;
        Ok(header.sequence)
    }

    pub async fn set_power_plan(&mut self, plan: &[PowerPlanRecord]) -> Result<u32> {
        if plan.is_empty() {
            return Err(Error::InvalidParameter("MPPWVector empty".into()));
        }
        let header = self
            .transmit_with_retransmit(Opcode::SetPowerPlan, &encode_records(plan))
            .await?;
        Ok(header.sequence)
    }

    pub async fn set_osnr_plan(&mut self, plan: &[OsnrPlanRecord]) -> Result<u32> {
        if plan.is_empty() {
            return Err(Error::InvalidParameter("MPOSNRVector empty".into()));
        }
        let header = self
            .transmit_with_retransmit(Opcode::SetOsnrPlan, &encode_records(plan))
            .await?;
        Ok(header.sequence)
    }

    /// Read back the power plan the module holds.
    pub async fn get_power_plan(&mut self) -> Result<Vec<PowerPlanRecord>> {
        self.fire_and_confirm(Opcode::GetPowerPlan, &[]).await?;
        let (header, payload) = self.poll_long(None).await?;
        check_reply(&header, &payload, Opcode::GetPowerPlan, None)?;
        Ok(decode_records(&payload))
    }

    pub async fn get_power_results(&mut self) -> Result<PowerResults> {
        self.fire_and_confirm(Opcode::GetPowerResults, &[]).await?;
        let (header, payload) = self.poll_long(None).await?;
        check_reply(&header, &payload, Opcode::GetPowerResults, None)?;
        PowerResults::decode(&payload)
    }

    pub async fn get_osnr_results(&mut self) -> Result<OsnrResults> {
        self.fire_and_confirm(Opcode::GetOsnrResults, &[]).await?;
        let (header, payload) = self.poll_long(None).await?;
        check_reply(&header, &payload, Opcode::GetOsnrResults, None)?;
        OsnrResults::decode(&payload)
    }

    // ---------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------

    pub async fn attribute_get(&mut self, attribute: Attribute) -> Result<u16> {
        let header = self
            .fire_and_confirm(Opcode::AttributeGet, &attribute.code().to_le_bytes())
            .await?;
        let (header, payload) = self.poll_long(Some(header.sequence)).await?;
        check_reply(&header, &payload, Opcode::AttributeGet, Some(2))?;
        Ok((&payload[..]).get_u16_le())
    }

    pub async fn attribute_set(&mut self, attribute: Attribute, value: u16) -> Result<Header> {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16_le(attribute.code());
        payload.put_u16_le(value);
        self.fire_and_confirm(Opcode::AttributeSet, &payload).await
    }

    /// Restore the factory value of `attribute`.
    pub async fn attribute_clear(&mut self, attribute: Attribute) -> Result<Header> {
        self.fire_and_confirm(Opcode::AttributeClear, &attribute.code().to_le_bytes())
            .await
    }

    // ---------------------------------------------------------------
    // Firmware
    // ---------------------------------------------------------------

    /// Transfer a firmware image in offset-tagged chunks.
    pub async fn firmware_transfer(&mut self, image: &[u8]) -> Result<()> {
        if image.is_empty() {
            return Err(Error::InvalidParameter("firmware image is empty".into()));
        }
        let chunks = image.len().div_ceil(FIRMWARE_CHUNK_LEN);
        for (index, chunk) in image.chunks(FIRMWARE_CHUNK_LEN).enumerate() {
            let offset = index * FIRMWARE_CHUNK_LEN;
            let mut payload = BytesMut::with_capacity(4 + chunk.len());
            payload.put_u32_le(offset as u32);
            payload.put_slice(chunk);
            self.fire_and_confirm(Opcode::FirmwareTransfer, &payload).await?;
            debug!(chunk = index + 1, of = chunks, offset, "firmware chunk transferred");
        }
        Ok(())
    }

    /// Commit the transferred image. Callers should widen the budget first.
    pub async fn firmware_save(&mut self) -> Result<Header> {
        self.fire_and_confirm(Opcode::FirmwareSave, &[]).await
    }

    /// Boot the saved image. Callers should widen the budget first.
    pub async fn firmware_execute(&mut self) -> Result<Header> {
        self.fire_and_confirm(Opcode::FirmwareExecute, &[]).await
    }
}
