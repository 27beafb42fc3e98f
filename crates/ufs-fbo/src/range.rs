//! LBA range request builder.
//!
//! The operator hands in `open,close[,open,close...]` as hexadecimal LBAs.
//! Each pair is an inclusive range. Accepted ranges are packed into the
//! WRITE BUFFER parameter list:
//!
//! ```text
//! 0        4                 12                20
//! +--------+-----------------+-----------------+----
//! | header | reserved slot   | entry 0         | ...
//! +--------+-----------------+-----------------+----
//!            byte 5 = count    be32 start LBA
//!                              be24 length
//!                              1 reserved byte
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::DeviceCapabilities;
use crate::codec::{put_be24, put_be32};
use crate::error::{FboError, FboResult, ValidationError};

/// Size of the buffer header.
pub const FBO_RW_BUF_HDR_SIZE: usize = 4;
/// Size of one range entry, and of the reserved slot after the header.
pub const FBO_RW_ENTRY_SIZE: usize = 8;
/// Payload offset of the range count.
pub const FBO_RANGE_COUNT_OFFSET: usize = 5;
/// Largest length the 24-bit wire field carries.
pub const FBO_MAX_WIRE_LENGTH: u32 = 0x00ff_ffff;

/// One inclusive LBA range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbaRange {
    /// First LBA of the range.
    pub start_lba: u64,
    /// Number of units covered, `close - open + 1`.
    pub length: u32,
}

impl LbaRange {
    /// Last LBA of the range.
    pub fn close_lba(&self) -> u64 {
        self.start_lba + self.length as u64 - 1
    }
}

/// A validated, non-empty list of LBA ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    ranges: Vec<LbaRange>,
}

impl RangeRequest {
    /// Parses and validates a range list against the device limits.
    pub fn parse(text: &str, caps: &DeviceCapabilities) -> Result<Self, ValidationError> {
        let text = text.trim_end();
        if text.is_empty() || !text.contains(',') {
            return Err(reject(ValidationError::Malformed(
                "LBA ranges must be separated by ','",
            )));
        }
        if text.starts_with(',') || text.ends_with(',') {
            return Err(reject(ValidationError::Malformed(
                "leading or trailing ','",
            )));
        }

        let tokens: Vec<&str> = text.split(',').collect();
        if tokens.len() % 2 != 0 {
            return Err(reject(ValidationError::OddTokenCount(tokens.len())));
        }

        let pairs = tokens.len() / 2;
        let max = caps.max_range_count as usize;
        if pairs > max {
            return Err(reject(ValidationError::TooManyRanges {
                requested: pairs,
                max,
            }));
        }

        let mut ranges = Vec::with_capacity(pairs);
        for pair in tokens.chunks_exact(2) {
            let open = parse_lba(pair[0])?;
            let close = parse_lba(pair[1])?;

            if close < open {
                return Err(reject(ValidationError::DecreasingRange { open, close }));
            }
            let length = (close - open).saturating_add(1);
            if !caps.length_in_bounds(length) {
                return Err(reject(ValidationError::LengthOutOfBounds {
                    length,
                    min: caps.min_range_size,
                    max: caps.max_length(),
                }));
            }
            if open > u32::MAX as u64 {
                return Err(reject(ValidationError::StartOutOfRange(open)));
            }

            ranges.push(LbaRange {
                start_lba: open,
                length: length as u32,
            });
        }

        debug!(count = ranges.len(), "parsed LBA range list");
        Ok(Self { ranges })
    }

    /// The accepted ranges in input order.
    pub fn ranges(&self) -> &[LbaRange] {
        &self.ranges
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Always false for a parsed request.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Parameter list length for `count` ranges.
    pub fn payload_len_for(count: usize) -> usize {
        FBO_RW_BUF_HDR_SIZE + FBO_RW_ENTRY_SIZE + count * FBO_RW_ENTRY_SIZE
    }

    /// Serializes the WRITE BUFFER parameter list.
    ///
    /// Fails with [`FboError::OutOfMemory`] when the list does not fit the
    /// staging buffer.
    pub fn to_payload(&self, staging_len: usize) -> FboResult<Vec<u8>> {
        let len = Self::payload_len_for(self.ranges.len());
        if len > staging_len {
            return Err(FboError::OutOfMemory {
                requested: len,
                limit: staging_len,
            });
        }

        let mut buf = vec![0u8; len];
        buf[FBO_RANGE_COUNT_OFFSET] = self.ranges.len() as u8;

        let mut offset = FBO_RW_BUF_HDR_SIZE + FBO_RW_ENTRY_SIZE;
        for range in &self.ranges {
            put_be32(range.start_lba as u32, &mut buf, offset);
            put_be24(range.length, &mut buf, offset + 4);
            offset += FBO_RW_ENTRY_SIZE;
        }
        Ok(buf)
    }
}

fn parse_lba(token: &str) -> Result<u64, ValidationError> {
    let trimmed = token.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(reject(ValidationError::BadNumber(token.to_string())));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|_| reject(ValidationError::BadNumber(token.to_string())))
}

fn reject(err: ValidationError) -> ValidationError {
    warn!(error = %err, "rejected LBA range list");
    err
}
