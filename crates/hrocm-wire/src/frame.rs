//! HROCM SPI frame encoder/validator.
//!
//! Every exchange with the module carries a fixed 64-byte header, in both
//! directions. Frames that carry a payload append it after the header and
//! close with a CRC-32 over everything before it.
//!
//! # Frame format
//!
//! ```text
//!  0  u32 magic          4  u32 length        8  u32 sequence
//! 12  u8  opcode        13  u8[3] reserved   16  i32 result
//! 20  u32 header CRC over bytes [0, 20)
//! 24  u32 operational status (OSS)
//! 28  u32 hardware status (HSS)
//! 32  u32 latched hardware status (LSS)
//! 36  i16 case temperature (CSS)        38  i16 internal temperature (ISS)
//! 40  u32 pending process mask (PPEND)
//! 44  u32 SEQARR[5]
//! 64  payload ...
//!     u32 frame CRC over bytes [0, length - 4)   (only if payload non-empty)
//! ```
//!
//! All fields are little-endian. A transmit buffer of zeros is a poll: the
//! module ignores frames whose magic is not the protocol constant.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use hrocm_core::FrameError;

use crate::opcode::{self, Opcode};

/// Magic word of protocol version 3.
pub const MAGIC_V3: u32 = 0xF0E1_C387;

/// Magic word of the legacy protocol version 1.
pub const MAGIC_V1: u32 = 0xF0E1_D2C3;

/// Magic word read from an unpowered or booting module.
pub const MAGIC_POWERED_OFF: u32 = 0xFFFF_FFFF;

/// Fixed header size, identical for commands and responses.
pub const HEADER_LEN: usize = 64;

/// Number of leading header bytes covered by the header CRC.
pub const HEADER_CRC_SPAN: usize = 20;

/// Size of a CRC field.
pub const CRC_LEN: usize = 4;

/// Number of per-pipeline completion slots in the header.
pub const SEQARR_LEN: usize = 5;

/// Largest single SPI transfer the module accepts.
pub const MAX_TRANSFER_LEN: usize = 131_072;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Standard CRC-32 (zlib/Ethernet) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

// ---------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------

/// A processing chain inside the module, addressed by its `SEQARR` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    Power,
    VirtualChannel,
    Cascade,
    Osnr,
    ChannelPlan,
}

impl Pipeline {
    pub const ALL: [Pipeline; SEQARR_LEN] = [
        Pipeline::Power,
        Pipeline::VirtualChannel,
        Pipeline::Cascade,
        Pipeline::Osnr,
        Pipeline::ChannelPlan,
    ];

    /// Index of this pipeline's slot in `SEQARR`.
    pub const fn index(self) -> usize {
        match self {
            Pipeline::Power => 0,
            Pipeline::VirtualChannel => 1,
            Pipeline::Cascade => 2,
            Pipeline::Osnr => 3,
            Pipeline::ChannelPlan => 4,
        }
    }

    /// Bit selecting this pipeline in a TPC task mask.
    pub const fn task_mask(self) -> u32 {
        1 << self.index()
    }

    /// Returns `true` if `mask` selects this pipeline.
    pub const fn in_mask(self, mask: u32) -> bool {
        mask & self.task_mask() != 0
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pipeline::Power => "power",
            Pipeline::VirtualChannel => "virtual-channel",
            Pipeline::Cascade => "cascade",
            Pipeline::Osnr => "osnr",
            Pipeline::ChannelPlan => "channel-plan",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------
// Header
// ---------------------------------------------------------------

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: u32,
    /// Total frame length in bytes, header included.
    pub length: u32,
    pub sequence: u32,
    pub opcode: u8,
    /// Command result: negative while pending, zero on success, positive
    /// for a device-reported error code.
    pub result: i32,
    /// Header CRC as received. Ignored when encoding.
    pub header_crc: u32,
    pub operational_status: u32,
    pub hardware_status: u32,
    pub latched_status: u32,
    /// Case temperature, tenths of a degree Celsius.
    pub case_temperature: i16,
    /// Internal (optics) temperature, tenths of a degree Celsius.
    pub internal_temperature: i16,
    /// Bit mask of processes still running.
    pub pending: u32,
    /// Sequence number of the last completed operation, per pipeline.
    pub seqarr: [u32; SEQARR_LEN],
}

impl Header {
    /// A response-side header for protocol 3 with every status field zero.
    pub fn new(opcode: u8, sequence: u32) -> Self {
        Header {
            magic: MAGIC_V3,
            length: HEADER_LEN as u32,
            sequence,
            opcode,
            ..Header::default()
        }
    }

    /// Returns `true` while the command is still being processed.
    pub fn is_pending(&self) -> bool {
        self.result < 0
    }

    /// Last completed sequence number of `pipeline`.
    pub fn completed(&self, pipeline: Pipeline) -> u32 {
        self.seqarr[pipeline.index()]
    }

    /// Number of payload bytes the header announces.
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LEN + CRC_LEN)
    }

    /// Append the encoded header, computing a fresh header CRC.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.sequence);
        buf.put_u8(self.opcode);
        buf.put_bytes(0, 3);
        buf.put_i32_le(self.result);
        let crc = crc32(&buf[start..start + HEADER_CRC_SPAN]);
        buf.put_u32_le(crc);
        buf.put_u32_le(self.operational_status);
        buf.put_u32_le(self.hardware_status);
        buf.put_u32_le(self.latched_status);
        buf.put_i16_le(self.case_temperature);
        buf.put_i16_le(self.internal_temperature);
        buf.put_u32_le(self.pending);
        for slot in self.seqarr {
            buf.put_u32_le(slot);
        }
    }

    /// Decode without validating. `bytes` must hold at least
    /// [`HEADER_LEN`] bytes.
    fn read_from(mut bytes: &[u8]) -> Header {
        let magic = bytes.get_u32_le();
        let length = bytes.get_u32_le();
        let sequence = bytes.get_u32_le();
        let opcode = bytes.get_u8();
        bytes.advance(3);
        let result = bytes.get_i32_le();
        let header_crc = bytes.get_u32_le();
        let operational_status = bytes.get_u32_le();
        let hardware_status = bytes.get_u32_le();
        let latched_status = bytes.get_u32_le();
        let case_temperature = bytes.get_i16_le();
        let internal_temperature = bytes.get_i16_le();
        let pending = bytes.get_u32_le();
        let mut seqarr = [0u32; SEQARR_LEN];
        for slot in seqarr.iter_mut() {
            *slot = bytes.get_u32_le();
        }
        Header {
            magic,
            length,
            sequence,
            opcode,
            result,
            header_crc,
            operational_status,
            hardware_status,
            latched_status,
            case_temperature,
            internal_temperature,
            pending,
            seqarr,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "magic={:#010X} length={} seq={} opcode={} result={} crc1={:#010X} \
             oss={:#X} hss={:#X} lss={:#X} css={} iss={} ppend={:#X} seqarr={:?}",
            self.magic,
            self.length,
            self.sequence,
            opcode::describe(self.opcode),
            self.result,
            self.header_crc,
            self.operational_status,
            self.hardware_status,
            self.latched_status,
            self.case_temperature,
            self.internal_temperature,
            self.pending,
            self.seqarr,
        )
    }
}

// ---------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------

/// Total frame length for a payload of `payload_len` bytes.
pub const fn frame_len(payload_len: usize) -> usize {
    if payload_len == 0 {
        HEADER_LEN
    } else {
        HEADER_LEN + payload_len + CRC_LEN
    }
}

/// Encode a frame from `header` and `payload`.
///
/// The header's `length` and CRC fields are computed; a trailing frame
/// CRC is appended only when the payload is non-empty.
pub fn encode_frame(header: &Header, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = frame_len(payload.len());
    if length > MAX_TRANSFER_LEN {
        return Err(FrameError::TooLarge {
            length,
            max: MAX_TRANSFER_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(length);
    Header {
        length: length as u32,
        ..*header
    }
    .write_to(&mut buf);

    if !payload.is_empty() {
        buf.put_slice(payload);
        let crc = crc32(&buf);
        buf.put_u32_le(crc);
    }
    Ok(buf.to_vec())
}

/// Encode a command frame.
///
/// # Example
///
/// ```
/// use hrocm_wire::frame::{encode_command, validate_full_frame, HEADER_LEN};
/// use hrocm_wire::Opcode;
///
/// let frame = encode_command(Opcode::Nop, 7, &[]).unwrap();
/// assert_eq!(frame.len(), HEADER_LEN);
/// let header = validate_full_frame(&frame, frame.len()).unwrap();
/// assert_eq!(header.sequence, 7);
/// ```
pub fn encode_command(
    opcode: Opcode,
    sequence: u32,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let header = Header {
        magic: MAGIC_V3,
        sequence,
        opcode: opcode.code(),
        ..Header::default()
    };
    encode_frame(&header, payload)
}

// ---------------------------------------------------------------
// Validation
// ---------------------------------------------------------------

/// Validate the header at the start of `bytes`.
///
/// Checks run in a fixed order: the powered-off pattern, the legacy
/// protocol magic, the header CRC, and finally the protocol 3 magic. A
/// corrupted header with an otherwise plausible magic therefore reports
/// [`FrameError::HeaderCrcMismatch`].
pub fn validate_header(bytes: &[u8]) -> Result<Header, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            declared: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let header = Header::read_from(bytes);
    if header.magic == MAGIC_POWERED_OFF {
        return Err(FrameError::MagicAllOnes);
    }
    if header.magic == MAGIC_V1 {
        return Err(FrameError::LegacyProtocol);
    }

    let computed = crc32(&bytes[..HEADER_CRC_SPAN]);
    if computed != header.header_crc {
        return Err(FrameError::HeaderCrcMismatch {
            received: header.header_crc,
            computed,
        });
    }

    if header.magic != MAGIC_V3 {
        return Err(FrameError::MagicMismatch {
            found: header.magic,
        });
    }
    Ok(header)
}

/// Returns `true` if `length` is a length a well-formed frame can have.
pub fn is_valid_length(length: u32) -> bool {
    let length = length as usize;
    length == HEADER_LEN || (length > HEADER_LEN + CRC_LEN && length <= MAX_TRANSFER_LEN)
}

/// Validate a complete frame of `declared_length` bytes.
///
/// The header must validate first. The frame's own length field must
/// agree with `declared_length`, all of those bytes must be present, and
/// the trailing CRC must match when the frame carries a payload.
pub fn validate_full_frame(bytes: &[u8], declared_length: usize) -> Result<Header, FrameError> {
    let header = validate_header(bytes)?;

    if !is_valid_length(header.length) {
        return Err(FrameError::BadLength {
            declared: header.length,
        });
    }
    if bytes.len() < declared_length {
        return Err(FrameError::Truncated {
            declared: declared_length,
            available: bytes.len(),
        });
    }
    if header.length as usize != declared_length {
        return Err(FrameError::LengthMismatch {
            expected: declared_length,
            found: header.length as usize,
        });
    }

    if declared_length > HEADER_LEN {
        let crc_at = declared_length - CRC_LEN;
        let received = (&bytes[crc_at..declared_length]).get_u32_le();
        let computed = crc32(&bytes[..crc_at]);
        if received != computed {
            return Err(FrameError::FullCrcMismatch { received, computed });
        }
    }
    Ok(header)
}

/// Payload of a validated frame: the bytes after the header and before the
/// trailing CRC.
pub fn payload<'a>(frame: &'a [u8], header: &Header) -> &'a [u8] {
    let length = (header.length as usize).min(frame.len());
    if length <= HEADER_LEN + CRC_LEN {
        return &[];
    }
    &frame[HEADER_LEN..length - CRC_LEN]
}
