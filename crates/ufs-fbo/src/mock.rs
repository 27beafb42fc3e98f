//! In-memory UFS device for tests and the simulator binary.
//!
//! Records every transport call so callers can assert which operations
//! reached the device.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{
    self, FboDescriptor, DEVICE_DESC_PARAM_EXT_UFS_FEATURE_SUP, QUERY_ATTR_IDN_FBO_LEVEL_EXE,
    QUERY_ATTR_IDN_FBO_PROG_STATE, QUERY_DESC_IDN_FBO, UFS_DEV_FBO_SUP,
};
use crate::command::{READ_BUFFER, WRITE_BUFFER};
use crate::error::{FboError, FboResult, TransportError};
use crate::range::{FBO_RW_BUF_HDR_SIZE, FBO_RW_ENTRY_SIZE};
use crate::state::ProgressState;
use crate::transport::{DataDirection, SenseData, UfsTransport};

/// Descriptor IDN of the device descriptor.
pub const QUERY_DESC_IDN_DEVICE: u8 = 0x00;
const DEVICE_DESC_LEN: usize = 0x59;
const EINVAL: i32 = -22;

/// A transport operation observed by [`MockUfsDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// Descriptor read by IDN.
    ReadDescriptor(u8),
    /// Attribute read by IDN.
    ReadAttribute(u8),
    /// Attribute write by IDN with value.
    WriteAttribute(u8, u32),
    /// SCSI command execution.
    Execute {
        /// CDB opcode.
        opcode: u8,
        /// Data buffer length.
        len: usize,
        /// Timeout passed by the caller.
        timeout: Duration,
    },
}

/// Simulated device settings, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// dExtendedUFSFeaturesSupport.
    pub ext_features: u32,
    /// FBO descriptor contents.
    pub descriptor: FboDescriptor,
    /// Initial execution threshold.
    pub exec_threshold: u32,
    /// Initial raw progress-state code.
    pub progress_state: u32,
    /// Whether operator commands are accepted.
    pub accessible: bool,
    /// Fragmentation level reported per range by READ BUFFER.
    pub frag_levels: Vec<u8>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            ext_features: UFS_DEV_FBO_SUP,
            descriptor: FboDescriptor {
                version: 0x0100,
                rec_range_size: 65536,
                max_range_size: 1048576,
                min_range_size: 4096,
                max_range_count: 4,
                alignment: 0,
            },
            exec_threshold: 0,
            progress_state: ProgressState::Idle.code() as u32,
            accessible: true,
            frag_levels: Vec::new(),
        }
    }
}

impl DeviceProfile {
    /// Loads a profile from a TOML file.
    pub fn from_file(path: &Path) -> FboResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FboError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents).map_err(|e| FboError::Config(e.to_string()))
    }
}

#[derive(Default)]
struct MockInner {
    ext_features: u32,
    descriptors: HashMap<u8, Vec<u8>>,
    attributes: HashMap<u8, u32>,
    failing_queries: HashMap<u8, i32>,
    failing_descriptors: HashMap<u8, i32>,
    next_command_failure: Option<SenseData>,
    accessible: bool,
    frag_levels: Vec<u8>,
    last_write: Option<Vec<u8>>,
    calls: Vec<TransportCall>,
    power_refs: i64,
    runtime_gets: u64,
}

/// In-memory device implementing [`UfsTransport`].
pub struct MockUfsDevice {
    inner: Mutex<MockInner>,
}

impl MockUfsDevice {
    /// A device with the default profile.
    pub fn new() -> Self {
        Self::from_profile(DeviceProfile::default())
    }

    /// A device reporting `desc` with otherwise default settings.
    pub fn with_descriptor(desc: FboDescriptor) -> Self {
        Self::from_profile(DeviceProfile {
            descriptor: desc,
            ..Default::default()
        })
    }

    /// A device built from a profile.
    pub fn from_profile(profile: DeviceProfile) -> Self {
        let mut inner = MockInner {
            ext_features: profile.ext_features,
            accessible: profile.accessible,
            frag_levels: profile.frag_levels,
            ..Default::default()
        };
        inner.descriptors.insert(
            QUERY_DESC_IDN_FBO,
            codec::encode_descriptor(&profile.descriptor).to_vec(),
        );
        inner
            .attributes
            .insert(QUERY_ATTR_IDN_FBO_LEVEL_EXE, profile.exec_threshold);
        inner
            .attributes
            .insert(QUERY_ATTR_IDN_FBO_PROG_STATE, profile.progress_state);
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Device descriptor carrying the extended feature bitmap.
    pub fn device_descriptor(&self) -> Vec<u8> {
        let mut desc = vec![0u8; DEVICE_DESC_LEN];
        desc[0] = DEVICE_DESC_LEN as u8;
        desc[1] = QUERY_DESC_IDN_DEVICE;
        codec::put_be32(
            self.inner.lock().ext_features,
            &mut desc,
            DEVICE_DESC_PARAM_EXT_UFS_FEATURE_SUP,
        );
        desc
    }

    /// Replaces the raw bytes returned for a descriptor IDN.
    pub fn set_descriptor_bytes(&self, idn: u8, raw: Vec<u8>) {
        self.inner.lock().descriptors.insert(idn, raw);
    }

    /// Sets an attribute value.
    pub fn set_attribute(&self, idn: u8, value: u32) {
        self.inner.lock().attributes.insert(idn, value);
    }

    /// Current attribute value.
    pub fn attribute(&self, idn: u8) -> Option<u32> {
        self.inner.lock().attributes.get(&idn).copied()
    }

    /// Moves the device to `state`.
    pub fn set_progress_state(&self, state: ProgressState) {
        self.set_attribute(QUERY_ATTR_IDN_FBO_PROG_STATE, state.code() as u32);
    }

    /// Makes reads and writes of attribute `idn` fail with `code`.
    pub fn fail_attribute(&self, idn: u8, code: i32) {
        self.inner.lock().failing_queries.insert(idn, code);
    }

    /// Makes reads of descriptor `idn` fail with `code`.
    pub fn fail_descriptor(&self, idn: u8, code: i32) {
        self.inner.lock().failing_descriptors.insert(idn, code);
    }

    /// Fails the next SCSI command with `sense`.
    pub fn fail_next_command(&self, sense: SenseData) {
        self.inner.lock().next_command_failure = Some(sense);
    }

    /// Toggles operator access.
    pub fn set_accessible(&self, accessible: bool) {
        self.inner.lock().accessible = accessible;
    }

    /// Fragmentation level reported for each range, in range order.
    pub fn set_frag_levels(&self, levels: Vec<u8>) {
        self.inner.lock().frag_levels = levels;
    }

    /// Payload of the last successful WRITE BUFFER.
    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.inner.lock().last_write.clone()
    }

    /// All transport calls so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// How often attribute `idn` was read.
    pub fn attribute_reads(&self, idn: u8) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| **c == TransportCall::ReadAttribute(idn))
            .count()
    }

    /// Outstanding runtime power references.
    pub fn power_refs(&self) -> i64 {
        self.inner.lock().power_refs
    }

    /// Total runtime power references taken.
    pub fn runtime_gets(&self) -> u64 {
        self.inner.lock().runtime_gets
    }
}

impl Default for MockUfsDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl UfsTransport for MockUfsDevice {
    fn read_descriptor(&self, idn: u8) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TransportCall::ReadDescriptor(idn));
        if let Some(code) = inner.failing_descriptors.get(&idn) {
            return Err(TransportError::Query { idn, code: *code });
        }
        if idn == QUERY_DESC_IDN_DEVICE {
            drop(inner);
            return Ok(self.device_descriptor());
        }
        inner
            .descriptors
            .get(&idn)
            .cloned()
            .ok_or(TransportError::Query { idn, code: EINVAL })
    }

    fn read_attribute(&self, idn: u8) -> Result<u32, TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TransportCall::ReadAttribute(idn));
        if let Some(code) = inner.failing_queries.get(&idn) {
            return Err(TransportError::Query { idn, code: *code });
        }
        inner
            .attributes
            .get(&idn)
            .copied()
            .ok_or(TransportError::Query { idn, code: EINVAL })
    }

    fn write_attribute(&self, idn: u8, value: u32) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TransportCall::WriteAttribute(idn, value));
        if let Some(code) = inner.failing_queries.get(&idn) {
            return Err(TransportError::Query { idn, code: *code });
        }
        inner.attributes.insert(idn, value);
        Ok(())
    }

    fn execute(
        &self,
        cdb: &[u8],
        direction: DataDirection,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SenseData> {
        let mut inner = self.inner.lock();
        let opcode = cdb.first().copied().unwrap_or_default();
        inner.calls.push(TransportCall::Execute {
            opcode,
            len: buffer.len(),
            timeout,
        });
        if let Some(sense) = inner.next_command_failure.take() {
            return Err(sense);
        }

        match (opcode, direction) {
            (WRITE_BUFFER, DataDirection::ToDevice) => {
                inner.last_write = Some(buffer.to_vec());
            }
            (READ_BUFFER, DataDirection::FromDevice) => {
                buffer.fill(0);
                if let Some(written) = &inner.last_write {
                    let n = written.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&written[..n]);
                }
                let first = (FBO_RW_BUF_HDR_SIZE + FBO_RW_ENTRY_SIZE).min(buffer.len());
                for (i, entry) in buffer[first..]
                    .chunks_exact_mut(FBO_RW_ENTRY_SIZE)
                    .enumerate()
                {
                    entry[FBO_RW_ENTRY_SIZE - 1] = inner.frag_levels.get(i).copied().unwrap_or(0);
                }
            }
            _ => {
                // ILLEGAL REQUEST, INVALID COMMAND OPERATION CODE
                return Err(SenseData {
                    sense_key: 0x5,
                    asc: 0x20,
                    ascq: 0x0,
                });
            }
        }

        debug!(opcode, len = buffer.len(), "mock command executed");
        Ok(buffer.len())
    }

    fn is_user_access_allowed(&self) -> bool {
        self.inner.lock().accessible
    }

    fn runtime_get(&self) {
        let mut inner = self.inner.lock();
        inner.power_refs += 1;
        inner.runtime_gets += 1;
    }

    fn runtime_put(&self) {
        self.inner.lock().power_refs -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_profile_probe_values() {
        let device = MockUfsDevice::new();
        let raw = device.read_descriptor(QUERY_DESC_IDN_FBO).unwrap();
        let desc = codec::decode_capabilities(&raw).unwrap();
        assert_eq!(desc, DeviceProfile::default().descriptor);
        assert_eq!(device.read_attribute(QUERY_ATTR_IDN_FBO_PROG_STATE).unwrap(), 0);
    }

    #[test]
    fn test_device_descriptor_feature_bits() {
        let device = MockUfsDevice::from_profile(DeviceProfile {
            ext_features: 0,
            ..Default::default()
        });
        let raw = device.read_descriptor(QUERY_DESC_IDN_DEVICE).unwrap();
        assert_eq!(codec::ext_feature_bitmap(&raw).unwrap(), 0);
    }

    #[test]
    fn test_read_buffer_echoes_ranges_with_levels() {
        let device = MockUfsDevice::new();
        device.set_frag_levels(vec![7]);
        let mut payload = vec![0u8; 20];
        payload[5] = 1;
        payload[12..16].copy_from_slice(&[0, 0, 0, 0x10]);
        device
            .execute(
                &[WRITE_BUFFER],
                DataDirection::ToDevice,
                &mut payload,
                Duration::from_secs(1),
            )
            .unwrap();

        let mut out = vec![0xAAu8; 20];
        device
            .execute(
                &[READ_BUFFER],
                DataDirection::FromDevice,
                &mut out,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(out[5], 1);
        assert_eq!(&out[12..16], &[0, 0, 0, 0x10]);
        assert_eq!(out[19], 7);
    }

    #[test]
    fn test_read_buffer_shorter_than_slot() {
        let device = MockUfsDevice::new();
        device.set_frag_levels(vec![9]);
        let mut out = vec![0xAAu8; 6];
        let n = device
            .execute(
                &[READ_BUFFER],
                DataDirection::FromDevice,
                &mut out,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, vec![0u8; 6]);
    }

    #[test]
    fn test_unknown_opcode_is_illegal_request() {
        let device = MockUfsDevice::new();
        let sense = device
            .execute(&[0x00], DataDirection::ToDevice, &mut [], Duration::ZERO)
            .unwrap_err();
        assert_eq!(sense.sense_key, 0x5);
    }

    #[test]
    fn test_profile_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
exec_threshold = 3
progress_state = 2
frag_levels = [1, 2]

[descriptor]
version = 256
rec_range_size = 8192
max_range_size = 65536
min_range_size = 4096
max_range_count = 8
alignment = 0
"#
        )
        .unwrap();

        let profile = DeviceProfile::from_file(file.path()).unwrap();
        assert_eq!(profile.exec_threshold, 3);
        assert_eq!(profile.descriptor.max_range_count, 8);
        assert!(profile.accessible);
        assert_eq!(profile.ext_features, UFS_DEV_FBO_SUP);
    }
}
