//! Error types for the HROCM driver.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Frame-level validation failures are
//! described by [`FrameError`]; the poll engine retries those and only
//! surfaces them inside [`Error::Timeout`] or [`Error::Frame`].

/// Reason a received buffer failed frame validation.
///
/// Every variant except [`FrameError::TooLarge`] is transient on a noisy
/// SPI link and is retried by the poll engine up to its attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The magic word reads `0xFFFFFFFF`: the module is unpowered or still
    /// booting and the bus is floating high.
    #[error("magic is 0xFFFFFFFF, module powered off or booting")]
    MagicAllOnes,

    /// The module answered with the protocol version 1 magic.
    #[error("module uses SPI protocol version 1")]
    LegacyProtocol,

    /// The magic word is neither the protocol 3 constant nor a known
    /// special value.
    #[error("magic mismatch: found {found:#010X}")]
    MagicMismatch { found: u32 },

    /// The CRC over the first 20 header bytes does not match.
    #[error("header CRC mismatch: received {received:#010X}, computed {computed:#010X}")]
    HeaderCrcMismatch { received: u32, computed: u32 },

    /// The length field is not a valid frame length.
    #[error("invalid frame length {declared}")]
    BadLength { declared: u32 },

    /// The frame announces a different length than the caller expected.
    #[error("frame length changed: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    /// Fewer bytes are available than the frame declares.
    #[error("frame truncated: {declared} bytes declared, {available} available")]
    Truncated { declared: usize, available: usize },

    /// The trailing CRC over the whole frame does not match.
    #[error("frame CRC mismatch: received {received:#010X}, computed {computed:#010X}")]
    FullCrcMismatch { received: u32, computed: u32 },

    /// An encoded frame would exceed the maximum single transfer size.
    #[error("frame of {length} bytes exceeds the {max} byte transfer limit")]
    TooLarge { length: usize, max: usize },
}

impl FrameError {
    /// Returns `true` for failures counted as magic errors.
    pub fn is_magic(&self) -> bool {
        matches!(
            self,
            FrameError::MagicAllOnes | FrameError::LegacyProtocol | FrameError::MagicMismatch { .. }
        )
    }

    /// Returns `true` for failures of the header CRC.
    pub fn is_header_crc(&self) -> bool {
        matches!(self, FrameError::HeaderCrcMismatch { .. })
    }
}

fn last_failure(last: &Option<FrameError>) -> String {
    match last {
        Some(reason) => format!(" (last failure: {reason})"),
        None => String::new(),
    }
}

/// The error type for all HROCM operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport adapter reported a failed exchange. Never retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// No connection to the adapter has been established.
    #[error("not connected")]
    NotConnected,

    /// A frame failed validation outside of a retry loop.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The attempt budget was exhausted.
    ///
    /// `last` carries the most recent frame validation failure, if the
    /// final attempts failed validation rather than waiting on a state
    /// the module never reached.
    #[error("timeout after {attempts} attempts{}", last_failure(.last))]
    Timeout {
        attempts: u32,
        last: Option<FrameError>,
    },

    /// The module reported a transaction other than the one just sent.
    #[error("sequence mismatch: expected {expected}, module reported {found}")]
    SequenceMismatch { expected: u32, found: u32 },

    /// The module completed the command with a positive result code.
    #[error("device reported error code {code} for opcode {opcode:#04X}")]
    Device { opcode: u8, code: i32 },

    /// Capability data needed for the operation is not available yet.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A well-formed frame carried unexpected content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
