//! Device capability store.
//!
//! Capabilities are read once at probe time. Only the execution threshold
//! changes afterwards, and only through the control surface.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{self, FboDescriptor, UFS_DEV_FBO_SUP};
use crate::config::FboConfig;
use crate::error::{FboError, FboResult};
use crate::range::FBO_MAX_WIRE_LENGTH;
use crate::transport::UfsTransport;

/// FBO limits and settings of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// FBO version.
    pub version: u16,
    /// Recommended LBA range size in bytes.
    pub rec_range_size: u32,
    /// Largest LBA range the host may send.
    pub max_range_size: u32,
    /// Smallest LBA range the host may send.
    pub min_range_size: u32,
    /// Most ranges per buffer command.
    pub max_range_count: u8,
    /// Alignment requirement in bytes; 0 means none.
    pub alignment: u16,
    exec_threshold: u8,
}

impl DeviceCapabilities {
    /// Combines a decoded descriptor with the current execution threshold.
    pub fn new(desc: FboDescriptor, exec_threshold: u8) -> Self {
        Self {
            version: desc.version,
            rec_range_size: desc.rec_range_size,
            max_range_size: desc.max_range_size,
            min_range_size: desc.min_range_size,
            max_range_count: desc.max_range_count,
            alignment: desc.alignment,
            exec_threshold,
        }
    }

    /// Current execution threshold (0..=10).
    pub fn threshold(&self) -> u8 {
        self.exec_threshold
    }

    /// Records a threshold the device accepted.
    pub(crate) fn set_threshold(&mut self, value: u8) {
        self.exec_threshold = value;
    }

    /// Largest range length that is both device-legal and encodable in the
    /// 24-bit wire field.
    pub fn max_length(&self) -> u32 {
        self.max_range_size.min(FBO_MAX_WIRE_LENGTH)
    }

    /// Whether an inclusive range length is within the device limits.
    pub fn length_in_bounds(&self, length: u64) -> bool {
        length >= self.min_range_size as u64 && length <= self.max_length() as u64
    }

    /// The descriptor fields of these capabilities.
    pub fn descriptor(&self) -> FboDescriptor {
        FboDescriptor {
            version: self.version,
            rec_range_size: self.rec_range_size,
            max_range_size: self.max_range_size,
            min_range_size: self.min_range_size,
            max_range_count: self.max_range_count,
            alignment: self.alignment,
        }
    }
}

/// Reads FBO capabilities when `ext_features` advertises support.
///
/// Returns [`FboError::NotSupported`] without touching the device when the
/// FBO bit is clear. Transport failures become [`FboError::ProbeFailed`].
pub fn probe<T: UfsTransport + ?Sized>(
    ext_features: u32,
    transport: &T,
    config: &FboConfig,
) -> FboResult<DeviceCapabilities> {
    if ext_features & UFS_DEV_FBO_SUP == 0 {
        debug!(ext_features, "device does not advertise FBO");
        return Err(FboError::NotSupported);
    }

    let raw = transport
        .read_descriptor(config.descriptor_idn)
        .map_err(|e| {
            warn!(error = %e, "failed reading FBO descriptor");
            FboError::ProbeFailed(e)
        })?;
    let desc = codec::decode_capabilities(&raw)?;

    let raw_threshold = transport
        .read_attribute(config.threshold_attr_idn)
        .map_err(|e| {
            warn!(error = %e, "failed reading FBO execution threshold");
            FboError::ProbeFailed(e)
        })?;
    let threshold = codec::decode_threshold(raw_threshold)?;

    let caps = DeviceCapabilities::new(desc, threshold);
    info!(
        version = caps.version,
        min_range_size = caps.min_range_size,
        max_range_size = caps.max_range_size,
        max_range_count = caps.max_range_count,
        threshold,
        "FBO capabilities probed"
    );
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{QUERY_ATTR_IDN_FBO_LEVEL_EXE, QUERY_DESC_IDN_FBO};
    use crate::mock::MockUfsDevice;

    fn descriptor() -> FboDescriptor {
        FboDescriptor {
            version: 0x0100,
            rec_range_size: 65536,
            max_range_size: 1048576,
            min_range_size: 4096,
            max_range_count: 4,
            alignment: 0,
        }
    }

    #[test]
    fn test_probe_reads_descriptor_and_threshold() {
        let device = MockUfsDevice::with_descriptor(descriptor());
        device.set_attribute(QUERY_ATTR_IDN_FBO_LEVEL_EXE, 3);

        let caps = probe(UFS_DEV_FBO_SUP, &device, &FboConfig::default()).unwrap();
        assert_eq!(caps.threshold(), 3);
        assert_eq!(caps.min_range_size, 4096);
        assert_eq!(caps.max_range_size, 1048576);
        assert_eq!(caps.max_range_count, 4);
        assert_eq!(caps.descriptor(), descriptor());
    }

    #[test]
    fn test_probe_without_feature_bit() {
        let device = MockUfsDevice::with_descriptor(descriptor());
        let err = probe(0, &device, &FboConfig::default()).unwrap_err();
        assert!(matches!(err, FboError::NotSupported));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_probe_descriptor_failure() {
        let device = MockUfsDevice::with_descriptor(descriptor());
        device.fail_descriptor(QUERY_DESC_IDN_FBO, -110);
        let err = probe(UFS_DEV_FBO_SUP, &device, &FboConfig::default()).unwrap_err();
        assert!(matches!(err, FboError::ProbeFailed(_)));
    }

    #[test]
    fn test_probe_threshold_failure() {
        let device = MockUfsDevice::with_descriptor(descriptor());
        device.fail_attribute(QUERY_ATTR_IDN_FBO_LEVEL_EXE, -5);
        let err = probe(UFS_DEV_FBO_SUP, &device, &FboConfig::default()).unwrap_err();
        assert!(matches!(err, FboError::ProbeFailed(_)));
    }

    #[test]
    fn test_length_in_bounds() {
        let caps = DeviceCapabilities::new(descriptor(), 0);
        assert!(caps.length_in_bounds(4096));
        assert!(caps.length_in_bounds(1048576));
        assert!(!caps.length_in_bounds(4095));
        assert!(!caps.length_in_bounds(1048577));
    }

    #[test]
    fn test_max_length_clamped_to_wire_field() {
        let mut desc = descriptor();
        desc.max_range_size = u32::MAX;
        desc.rec_range_size = u32::MAX;
        let caps = DeviceCapabilities::new(desc, 0);
        assert_eq!(caps.max_length(), FBO_MAX_WIRE_LENGTH);
        assert!(caps.length_in_bounds(FBO_MAX_WIRE_LENGTH as u64));
        assert!(!caps.length_in_bounds(FBO_MAX_WIRE_LENGTH as u64 + 1));
    }
}
