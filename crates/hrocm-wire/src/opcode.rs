//! Command opcodes and attribute selectors.

use std::fmt;

use hrocm_core::Error;

/// Opcodes the driver sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operation; exercises the sequence handshake.
    Nop = 0x01,
    /// Reset the module.
    Reset = 0x02,
    /// Set the user-assigned module identifier.
    ModuleId = 0x03,
    /// Clear latched errors.
    ClearErrors = 0x04,
    /// Trigger and process: start the pipelines selected by a task mask.
    TriggerProcess = 0x06,
    /// Firmware transfer of one chunk.
    FirmwareTransfer = 0x07,
    /// Save the transferred firmware image.
    FirmwareSave = 0x08,
    /// Execute the saved firmware image.
    FirmwareExecute = 0x09,
    /// Read the device capability record.
    GetDevice = 0x0A,
    /// Upload the power measurement plan.
    SetPowerPlan = 0x0B,
    /// Read back the power measurement plan.
    GetPowerPlan = 0x0C,
    /// Read power scan results.
    GetPowerResults = 0x0D,
    /// Upload the OSNR measurement plan.
    SetOsnrPlan = 0x14,
    /// Read OSNR scan results.
    GetOsnrResults = 0x16,
    /// Attribute get.
    AttributeGet = 0x1C,
    /// Attribute set.
    AttributeSet = 0x1D,
    /// Attribute clear (restore factory value).
    AttributeClear = 0x1E,
}

impl Opcode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Short protocol mnemonic, e.g. `"GETDEV"`.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Reset => "RES",
            Opcode::ModuleId => "MID",
            Opcode::ClearErrors => "CLE",
            Opcode::TriggerProcess => "TPC",
            Opcode::FirmwareTransfer => "FWT",
            Opcode::FirmwareSave => "FWS",
            Opcode::FirmwareExecute => "FWE",
            Opcode::GetDevice => "GETDEV",
            Opcode::SetPowerPlan => "SETMPPW",
            Opcode::GetPowerPlan => "GETMPPW",
            Opcode::GetPowerResults => "GETMPW",
            Opcode::SetOsnrPlan => "SETMPOSNR",
            Opcode::GetOsnrResults => "GETMOSNR",
            Opcode::AttributeGet => "ATG",
            Opcode::AttributeSet => "ATS",
            Opcode::AttributeClear => "ATC",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x01 => Opcode::Nop,
            0x02 => Opcode::Reset,
            0x03 => Opcode::ModuleId,
            0x04 => Opcode::ClearErrors,
            0x06 => Opcode::TriggerProcess,
            0x07 => Opcode::FirmwareTransfer,
            0x08 => Opcode::FirmwareSave,
            0x09 => Opcode::FirmwareExecute,
            0x0A => Opcode::GetDevice,
            0x0B => Opcode::SetPowerPlan,
            0x0C => Opcode::GetPowerPlan,
            0x0D => Opcode::GetPowerResults,
            0x14 => Opcode::SetOsnrPlan,
            0x16 => Opcode::GetOsnrResults,
            0x1C => Opcode::AttributeGet,
            0x1D => Opcode::AttributeSet,
            0x1E => Opcode::AttributeClear,
            other => {
                return Err(Error::Protocol(format!("unknown opcode {other:#04X}")));
            }
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Mnemonic for a raw opcode byte, or its hex value if unknown.
///
/// Zero is what a module reports before it has processed any command.
pub fn describe(code: u8) -> String {
    match Opcode::try_from(code) {
        Ok(op) => op.mnemonic().to_string(),
        Err(_) => format!("{code:#04X}"),
    }
}

/// Attribute selector carried by ATG/ATS/ATC.
///
/// Averaging and bandwidth mode are written through one selector and read
/// back through another that reports the value actually in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Attribute {
    Averaging = 0,
    ActiveAveraging = 1,
    BandwidthMode = 2,
    ActiveBandwidthMode = 3,
}

impl Attribute {
    pub const fn code(self) -> u16 {
        self as u16
    }
}
