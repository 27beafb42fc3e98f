//! Vendor READ BUFFER / WRITE BUFFER framing and dispatch.
//!
//! Buffer commands are issued exactly once. A failed command surfaces its
//! sense data to the caller; retries are left to the operator.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::codec::put_be24;
use crate::error::{FboError, FboResult, TransportError};
use crate::transport::{DataDirection, UfsTransport};

/// SCSI WRITE BUFFER opcode.
pub const WRITE_BUFFER: u8 = 0x3b;
/// SCSI READ BUFFER opcode.
pub const READ_BUFFER: u8 = 0x3c;
/// Length of the buffer command CDB.
pub const BUFFER_CDB_LEN: usize = 10;
/// Mode byte shared by both FBO buffer commands.
pub const FBO_BUFFER_MODE: u8 = 0x02;
/// Largest parameter list the 24-bit length field carries.
pub const MAX_PARAM_LEN: usize = 0x00ff_ffff;

/// Which buffer command to frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferCommand {
    /// READ BUFFER, fetches per-range fragmentation levels.
    Read,
    /// WRITE BUFFER, carries the LBA range list.
    Write,
}

impl BufferCommand {
    /// SCSI opcode.
    pub fn opcode(self) -> u8 {
        match self {
            Self::Read => READ_BUFFER,
            Self::Write => WRITE_BUFFER,
        }
    }

    /// Buffer ID byte that selects the FBO sub-mode.
    pub fn buffer_id(self) -> u8 {
        match self {
            Self::Read => 0x02,
            Self::Write => 0x01,
        }
    }

    /// Data phase direction.
    pub fn direction(self) -> DataDirection {
        match self {
            Self::Read => DataDirection::FromDevice,
            Self::Write => DataDirection::ToDevice,
        }
    }

    /// Builds the CDB for a parameter list of `param_len` bytes.
    pub fn cdb(self, param_len: usize) -> [u8; BUFFER_CDB_LEN] {
        let mut cdb = [0u8; BUFFER_CDB_LEN];
        cdb[0] = self.opcode();
        cdb[1] = FBO_BUFFER_MODE;
        cdb[2] = self.buffer_id();
        put_be24(param_len as u32, &mut cdb, 6);
        cdb
    }
}

/// Issues buffer commands through the transport.
pub struct Dispatcher<T: UfsTransport> {
    transport: Arc<T>,
    timeout: Duration,
}

impl<T: UfsTransport> Dispatcher<T> {
    /// Creates a dispatcher with a fixed per-command timeout.
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Sends a WRITE BUFFER carrying `payload`.
    pub fn submit_write(&self, payload: &[u8]) -> FboResult<()> {
        let mut buf = payload.to_vec();
        self.issue(BufferCommand::Write, &mut buf)?;
        Ok(())
    }

    /// Issues a READ BUFFER for `len` bytes and returns the data.
    pub fn submit_read(&self, len: usize) -> FboResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.issue(BufferCommand::Read, &mut buf)?;
        Ok(buf)
    }

    fn issue(&self, command: BufferCommand, buf: &mut [u8]) -> FboResult<usize> {
        if buf.len() > MAX_PARAM_LEN {
            return Err(FboError::OutOfMemory {
                requested: buf.len(),
                limit: MAX_PARAM_LEN,
            });
        }

        let cdb = command.cdb(buf.len());
        debug!(?command, cdb = ?cdb, len = buf.len(), "issuing FBO buffer command");

        self.transport
            .execute(&cdb, command.direction(), buf, self.timeout)
            .map_err(|sense| {
                error!(
                    ?command,
                    sense_key = sense.sense_key,
                    asc = sense.asc,
                    ascq = sense.ascq,
                    "FBO buffer command failed"
                );
                FboError::Transport(TransportError::Command { sense })
            })
    }
}
