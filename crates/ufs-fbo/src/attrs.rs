//! Text endpoints for the operator, grouped as `fbo_dev_ctrl`.
//!
//! Each endpoint maps onto one [`FboControl`](crate::control::FboControl)
//! operation. Reads produce newline-terminated text; writes return the
//! number of input bytes consumed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FboError, FboResult, ValidationError};
use crate::host::UfsHost;
use crate::transport::UfsTransport;

/// Name of the endpoint group.
pub const ATTRIBUTE_GROUP: &str = "fbo_dev_ctrl";

/// Access mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrMode {
    /// Read only.
    ReadOnly,
    /// Write only.
    WriteOnly,
    /// Read and write.
    ReadWrite,
}

/// Operator endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FboAttribute {
    /// `1` when the device supports FBO.
    Support,
    /// Progress state code.
    ProgressState,
    /// Operation control value.
    OperationCtrl,
    /// Execution threshold 0..=10.
    ExecThreshold,
    /// LBA range list.
    SendLba,
    /// Fragmentation dump of the last submitted ranges.
    LbaFragState,
}

impl FboAttribute {
    /// All endpoints in group order.
    pub const ALL: [FboAttribute; 6] = [
        Self::Support,
        Self::ProgressState,
        Self::OperationCtrl,
        Self::ExecThreshold,
        Self::SendLba,
        Self::LbaFragState,
    ];

    /// Endpoint file name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Support => "fbo_support",
            Self::ProgressState => "fbo_prog_state",
            Self::OperationCtrl => "fbo_operation_ctrl",
            Self::ExecThreshold => "fbo_exe_threshold",
            Self::SendLba => "fbo_send_lba",
            Self::LbaFragState => "fbo_lba_frag_state",
        }
    }

    /// Looks an endpoint up by file name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Access mode.
    pub fn mode(self) -> AttrMode {
        match self {
            Self::Support | Self::ProgressState | Self::LbaFragState => AttrMode::ReadOnly,
            Self::OperationCtrl | Self::SendLba => AttrMode::WriteOnly,
            Self::ExecThreshold => AttrMode::ReadWrite,
        }
    }

    /// Whether [`show`] accepts this endpoint.
    pub fn is_readable(self) -> bool {
        self.mode() != AttrMode::WriteOnly
    }

    /// Whether [`store`] accepts this endpoint.
    pub fn is_writable(self) -> bool {
        self.mode() != AttrMode::ReadOnly
    }
}

impl fmt::Display for FboAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reads an endpoint.
pub fn show<T: UfsTransport>(host: &UfsHost<T>, attr: FboAttribute) -> FboResult<String> {
    if !attr.is_readable() {
        return Err(denied(attr, "readable"));
    }

    match attr {
        FboAttribute::Support => Ok(format!("{}\n", u8::from(host.fbo_supported()))),
        FboAttribute::ProgressState => {
            let state = host.require_fbo()?.get_progress_state()?;
            Ok(format!("{}\n", state.code()))
        }
        FboAttribute::ExecThreshold => Ok(format!("{}\n", host.require_fbo()?.get_threshold())),
        FboAttribute::LbaFragState => {
            Ok(host.require_fbo()?.get_fragmentation_report()?.to_string())
        }
        FboAttribute::OperationCtrl | FboAttribute::SendLba => Err(denied(attr, "readable")),
    }
}

/// Writes an endpoint. Returns the number of bytes consumed.
pub fn store<T: UfsTransport>(
    host: &UfsHost<T>,
    attr: FboAttribute,
    input: &str,
) -> FboResult<usize> {
    if !attr.is_writable() {
        return Err(denied(attr, "writable"));
    }

    let fbo = host.require_fbo()?;
    match attr {
        FboAttribute::OperationCtrl => fbo.set_operation_control(parse_uint(input)?)?,
        FboAttribute::ExecThreshold => fbo.set_threshold(parse_uint(input)?)?,
        FboAttribute::SendLba => {
            fbo.submit_ranges(input)?;
        }
        FboAttribute::Support | FboAttribute::ProgressState | FboAttribute::LbaFragState => {
            return Err(denied(attr, "writable"));
        }
    }
    Ok(input.len())
}

fn denied(attr: FboAttribute, access: &'static str) -> FboError {
    FboError::AccessDenied {
        attribute: attr.name(),
        access,
    }
}

/// Parses an unsigned 32-bit integer with automatic radix: `0x` hex,
/// leading `0` octal, decimal otherwise. One trailing newline is allowed.
pub fn parse_uint(input: &str) -> Result<u32, ValidationError> {
    let s = input.strip_suffix('\n').unwrap_or(input);
    let bad = || ValidationError::BadValue(input.to_string());

    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(bad());
    }
    u32::from_str_radix(digits, radix).map_err(|_| bad())
}
