//! FBO progress state.
//!
//! The device owns the state machine; the host only reads it. Every query goes
//! to the device because background optimization can move the state at any
//! time.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DecodeError, FboResult};
use crate::transport::UfsTransport;

/// Device-reported FBO progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProgressState {
    /// No analysis or optimization in progress.
    Idle = 0x00,
    /// Analysis or optimization running.
    Ongoing = 0x01,
    /// Fragmentation analysis finished.
    AnalysisComplete = 0x02,
    /// Optimization finished.
    OptimizationComplete = 0x03,
    /// Device-side failure.
    InternalError = 0xff,
}

impl ProgressState {
    /// Wire code of the state.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the execution threshold may be changed in this state.
    pub fn permits_threshold_change(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::AnalysisComplete | Self::OptimizationComplete
        )
    }

    /// Whether a new LBA range list may be submitted in this state.
    pub fn permits_range_submit(self) -> bool {
        self == Self::Idle
    }

    /// Reads the progress-state attribute from the device.
    pub fn query<T: UfsTransport + ?Sized>(transport: &T, attr_idn: u8) -> FboResult<Self> {
        let raw = transport.read_attribute(attr_idn).inspect_err(|e| {
            warn!(error = %e, "query of FBO progress state failed");
        })?;

        let state = Self::try_from(raw).inspect_err(|_| {
            warn!(raw, "unknown FBO progress state");
        })?;
        debug!(?state, "FBO progress state");
        Ok(state)
    }
}

impl TryFrom<u32> for ProgressState {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Idle),
            0x01 => Ok(Self::Ongoing),
            0x02 => Ok(Self::AnalysisComplete),
            0x03 => Ok(Self::OptimizationComplete),
            0xff => Ok(Self::InternalError),
            other => Err(DecodeError::UnknownState(other)),
        }
    }
}
