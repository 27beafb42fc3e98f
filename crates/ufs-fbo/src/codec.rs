//! Descriptor and attribute codec.
//!
//! All multi-byte fields on the wire are big-endian. Layout of the FBO
//! descriptor:
//!
//! | Offset | Size | Field                       |
//! |--------|------|-----------------------------|
//! | 0x00   | 1    | bLength                     |
//! | 0x01   | 1    | bDescriptorIDN              |
//! | 0x02   | 2    | wFBOVersion                 |
//! | 0x04   | 4    | dFBORecommendedLBARangeSize |
//! | 0x08   | 4    | dFBOMaxLBARangeSize         |
//! | 0x0C   | 4    | dFBOMinLBARangeSize         |
//! | 0x10   | 1    | bFBOMaxLBARangeCount        |
//! | 0x11   | 2    | wFBOLBARangeAlignment       |

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DecodeError;
use crate::state::ProgressState;

/// Total length of the FBO descriptor in bytes.
pub const FBO_DESC_LEN: usize = 0x13;
/// Descriptor IDN of the FBO descriptor.
pub const QUERY_DESC_IDN_FBO: u8 = 0x0a;
/// Attribute IDN of bFBOControl.
pub const QUERY_ATTR_IDN_FBO_CONTROL: u8 = 0x31;
/// Attribute IDN of bFBOExecuteThreshold.
pub const QUERY_ATTR_IDN_FBO_LEVEL_EXE: u8 = 0x32;
/// Attribute IDN of bFBOProgressState.
pub const QUERY_ATTR_IDN_FBO_PROG_STATE: u8 = 0x33;

/// Offset of dExtendedUFSFeaturesSupport in the device descriptor.
pub const DEVICE_DESC_PARAM_EXT_UFS_FEATURE_SUP: usize = 0x4f;
/// FBO bit of dExtendedUFSFeaturesSupport.
pub const UFS_DEV_FBO_SUP: u32 = 1 << 18;

/// Highest execution threshold the device accepts.
pub const MAX_EXEC_THRESHOLD: u32 = 10;

const FBO_DESC_PARAM_LEN: usize = 0x00;
const FBO_DESC_PARAM_TYPE: usize = 0x01;
const FBO_DESC_PARAM_VERSION: usize = 0x02;
const FBO_DESC_PARAM_REC_LBA_RANGE_SIZE: usize = 0x04;
const FBO_DESC_PARAM_MAX_LBA_RANGE_SIZE: usize = 0x08;
const FBO_DESC_PARAM_MIN_LBA_RANGE_SIZE: usize = 0x0c;
const FBO_DESC_PARAM_MAX_LBA_RANGE_COUNT: usize = 0x10;
const FBO_DESC_PARAM_LBA_RANGE_ALIGNMENT: usize = 0x11;

/// Fields of the FBO descriptor as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FboDescriptor {
    /// FBO version.
    pub version: u16,
    /// Recommended LBA range size in bytes.
    pub rec_range_size: u32,
    /// Largest LBA range the host may send.
    pub max_range_size: u32,
    /// Smallest LBA range the host may send.
    pub min_range_size: u32,
    /// Most ranges accepted by one buffer command.
    pub max_range_count: u8,
    /// Alignment requirement in bytes; 0 means none.
    pub alignment: u16,
}

impl FboDescriptor {
    /// Checks min <= recommended <= max and a non-zero range count.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.min_range_size > self.rec_range_size || self.rec_range_size > self.max_range_size {
            return Err(DecodeError::InvalidCapabilities {
                reason: format!(
                    "range sizes not ordered: min {} rec {} max {}",
                    self.min_range_size, self.rec_range_size, self.max_range_size
                ),
            });
        }
        if self.max_range_count == 0 {
            return Err(DecodeError::InvalidCapabilities {
                reason: "max range count is zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Writes the low 16 bits of `value` big-endian at `offset`.
pub fn put_be16(value: u16, out: &mut [u8], offset: usize) {
    out[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Writes the low 24 bits of `value` big-endian at `offset`.
pub fn put_be24(value: u32, out: &mut [u8], offset: usize) {
    out[offset..offset + 3].copy_from_slice(&value.to_be_bytes()[1..]);
}

/// Writes `value` big-endian at `offset`.
pub fn put_be32(value: u32, out: &mut [u8], offset: usize) {
    out[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Reads a big-endian u16 at `offset`.
pub fn get_be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Reads a big-endian 24-bit value at `offset`.
pub fn get_be24(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([0, buf[offset], buf[offset + 1], buf[offset + 2]])
}

/// Reads a big-endian u32 at `offset`.
pub fn get_be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Parses the FBO descriptor. Trailing bytes beyond [`FBO_DESC_LEN`] are ignored.
pub fn decode_capabilities(raw: &[u8]) -> Result<FboDescriptor, DecodeError> {
    if raw.len() < FBO_DESC_LEN {
        return Err(DecodeError::Truncated {
            expected: FBO_DESC_LEN,
            actual: raw.len(),
        });
    }

    let desc = FboDescriptor {
        version: get_be16(raw, FBO_DESC_PARAM_VERSION),
        rec_range_size: get_be32(raw, FBO_DESC_PARAM_REC_LBA_RANGE_SIZE),
        max_range_size: get_be32(raw, FBO_DESC_PARAM_MAX_LBA_RANGE_SIZE),
        min_range_size: get_be32(raw, FBO_DESC_PARAM_MIN_LBA_RANGE_SIZE),
        max_range_count: raw[FBO_DESC_PARAM_MAX_LBA_RANGE_COUNT],
        alignment: get_be16(raw, FBO_DESC_PARAM_LBA_RANGE_ALIGNMENT),
    };
    desc.validate()?;

    debug!(
        version = desc.version,
        min = desc.min_range_size,
        max = desc.max_range_size,
        max_count = desc.max_range_count,
        "decoded FBO descriptor"
    );
    Ok(desc)
}

/// Serializes a descriptor in the device layout.
pub fn encode_descriptor(desc: &FboDescriptor) -> [u8; FBO_DESC_LEN] {
    let mut raw = [0u8; FBO_DESC_LEN];
    raw[FBO_DESC_PARAM_LEN] = FBO_DESC_LEN as u8;
    raw[FBO_DESC_PARAM_TYPE] = QUERY_DESC_IDN_FBO;
    put_be16(desc.version, &mut raw, FBO_DESC_PARAM_VERSION);
    put_be32(desc.rec_range_size, &mut raw, FBO_DESC_PARAM_REC_LBA_RANGE_SIZE);
    put_be32(desc.max_range_size, &mut raw, FBO_DESC_PARAM_MAX_LBA_RANGE_SIZE);
    put_be32(desc.min_range_size, &mut raw, FBO_DESC_PARAM_MIN_LBA_RANGE_SIZE);
    raw[FBO_DESC_PARAM_MAX_LBA_RANGE_COUNT] = desc.max_range_count;
    put_be16(desc.alignment, &mut raw, FBO_DESC_PARAM_LBA_RANGE_ALIGNMENT);
    raw
}

/// Maps a raw progress-state attribute onto [`ProgressState`].
pub fn decode_progress_state(raw_attr: u32) -> Result<ProgressState, DecodeError> {
    ProgressState::try_from(raw_attr)
}

/// Validates a raw execution-threshold attribute.
pub fn decode_threshold(raw_attr: u32) -> Result<u8, DecodeError> {
    if raw_attr > MAX_EXEC_THRESHOLD {
        return Err(DecodeError::ThresholdOutOfRange(raw_attr));
    }
    Ok(raw_attr as u8)
}

/// Reads dExtendedUFSFeaturesSupport from a device descriptor.
pub fn ext_feature_bitmap(device_desc: &[u8]) -> Result<u32, DecodeError> {
    let end = DEVICE_DESC_PARAM_EXT_UFS_FEATURE_SUP + 4;
    if device_desc.len() < end {
        return Err(DecodeError::Truncated {
            expected: end,
            actual: device_desc.len(),
        });
    }
    Ok(get_be32(device_desc, DEVICE_DESC_PARAM_EXT_UFS_FEATURE_SUP))
}
