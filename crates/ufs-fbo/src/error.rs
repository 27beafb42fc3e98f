//! Error types for the FBO control path.

use thiserror::Error;

use crate::state::ProgressState;
use crate::transport::SenseData;

/// Result type alias for FBO operations.
pub type FboResult<T> = Result<T, FboError>;

/// A malformed or unrecognized value read back from the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The descriptor buffer is shorter than the fixed layout.
    #[error("Descriptor truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually returned.
        actual: usize,
    },

    /// The progress-state attribute holds a code outside the known set.
    #[error("Unknown progress state {0:#x}")]
    UnknownState(u32),

    /// The execution-threshold attribute is outside 0..=10.
    #[error("Execution threshold {0} out of range 0..=10")]
    ThresholdOutOfRange(u32),

    /// The decoded range-size limits are inconsistent.
    #[error("Invalid capabilities: {reason}")]
    InvalidCapabilities {
        /// Which invariant the descriptor violates.
        reason: String,
    },
}

/// Operator input rejected before any device access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The range list is not a comma separated sequence of tokens.
    #[error("Malformed LBA range list: {0}")]
    Malformed(&'static str),

    /// The range list holds an odd number of LBAs.
    #[error("Odd LBA count {0}: ranges are open,close pairs")]
    OddTokenCount(usize),

    /// More ranges than the device accepts in one buffer command.
    #[error("Too many LBA ranges: {requested} > {max}")]
    TooManyRanges {
        /// Number of pairs in the input.
        requested: usize,
        /// Device reported maximum.
        max: usize,
    },

    /// A token is not a hexadecimal number.
    #[error("Invalid number: {0:?}")]
    BadNumber(String),

    /// A pair closes before it opens.
    #[error("Decreasing LBA range: open {open:#x}, close {close:#x}")]
    DecreasingRange {
        /// Opening LBA.
        open: u64,
        /// Closing LBA.
        close: u64,
    },

    /// A range length is outside the device limits.
    #[error("LBA range length {length} outside [{min}, {max}]")]
    LengthOutOfBounds {
        /// Inclusive length of the offending range.
        length: u64,
        /// Minimum range size.
        min: u32,
        /// Maximum range size.
        max: u32,
    },

    /// A start LBA does not fit the 32-bit wire field.
    #[error("Start LBA {0:#x} exceeds 32-bit field")]
    StartOutOfRange(u64),

    /// Threshold input outside 0..=10.
    #[error("Execution threshold {0} out of range 0..=10")]
    ThresholdOutOfRange(u32),

    /// Scalar input that is not an unsigned 32-bit integer.
    #[error("Invalid value: {0:?}")]
    BadValue(String),
}

/// Failure reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A descriptor or attribute query failed after the transport's retries.
    #[error("Query for IDN {idn:#x} failed with code {code}")]
    Query {
        /// Descriptor or attribute identifier.
        idn: u8,
        /// Transport-level status code.
        code: i32,
    },

    /// A SCSI command completed with a non-zero status.
    #[error("Command failed: {sense}")]
    Command {
        /// Captured sense detail.
        sense: SenseData,
    },
}

/// Error variants for FBO operations.
#[derive(Debug, Error)]
pub enum FboError {
    /// The device does not advertise FBO.
    #[error("File-based optimization not supported by device")]
    NotSupported,

    /// Reading capabilities during probe failed; FBO stays disabled.
    #[error("FBO probe failed: {0}")]
    ProbeFailed(#[source] TransportError),

    /// Unrecognized on-wire value.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Operator input violates format or device limits.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The device progress state forbids the operation.
    #[error("Illegal FBO progress state: {0:?}")]
    IllegalState(ProgressState),

    /// The device is not accepting operator commands right now.
    #[error("Device busy: operator access not allowed")]
    Busy,

    /// Command or query failed at the transport layer.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Staging buffer too small for the requested transfer.
    #[error("Out of memory: staging buffer needs {requested} bytes, limit {limit}")]
    OutOfMemory {
        /// Bytes needed.
        requested: usize,
        /// Configured staging buffer length.
        limit: usize,
    },

    /// Endpoint used against its access mode.
    #[error("Attribute {attribute} is not {access}")]
    AccessDenied {
        /// Endpoint name.
        attribute: &'static str,
        /// The missing access, "readable" or "writable".
        access: &'static str,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),
}
