//! Transport collaborator interface.
//!
//! The host controller driver owns query, SCSI execution and runtime power
//! management. This module describes the subset the FBO control path needs as
//! the [`UfsTransport`] trait, so the control path can run against real
//! hardware or an in-memory device ([`crate::mock::MockUfsDevice`]).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Sense detail captured when a SCSI command fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenseData {
    /// Sense key.
    pub sense_key: u8,
    /// Additional sense code.
    pub asc: u8,
    /// Additional sense code qualifier.
    pub ascq: u8,
}

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sense key {:#x}, asc {:#x}, ascq {:#x}",
            self.sense_key, self.asc, self.ascq
        )
    }
}

/// Direction of the data phase of a SCSI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataDirection {
    /// Host to device (WRITE BUFFER).
    ToDevice,
    /// Device to host (READ BUFFER).
    FromDevice,
}

/// Operations the FBO control path consumes from the host controller.
///
/// Descriptor and attribute queries carry their own retry policy. Command
/// execution is a single attempt bounded by `timeout`.
pub trait UfsTransport: Send + Sync {
    /// Read a descriptor by IDN.
    fn read_descriptor(&self, idn: u8) -> Result<Vec<u8>, TransportError>;

    /// Read an attribute by IDN.
    fn read_attribute(&self, idn: u8) -> Result<u32, TransportError>;

    /// Write an attribute by IDN.
    fn write_attribute(&self, idn: u8, value: u32) -> Result<(), TransportError>;

    /// Execute a SCSI command. `buffer` is the data-out payload for
    /// [`DataDirection::ToDevice`] and is filled for [`DataDirection::FromDevice`].
    /// Returns the number of bytes transferred.
    fn execute(
        &self,
        cdb: &[u8],
        direction: DataDirection,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SenseData>;

    /// Whether operator-initiated commands may reach the device right now.
    fn is_user_access_allowed(&self) -> bool;

    /// Resume the device and take a runtime power reference.
    fn runtime_get(&self);

    /// Drop a runtime power reference taken by [`UfsTransport::runtime_get`].
    fn runtime_put(&self);
}

/// Holds a runtime power reference for its lifetime.
pub struct PowerGuard<'a, T: UfsTransport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: UfsTransport + ?Sized> PowerGuard<'a, T> {
    /// Wake the device; the reference is released on drop.
    pub fn new(transport: &'a T) -> Self {
        transport.runtime_get();
        Self { transport }
    }
}

impl<T: UfsTransport + ?Sized> Drop for PowerGuard<'_, T> {
    fn drop(&mut self) {
        self.transport.runtime_put();
    }
}
