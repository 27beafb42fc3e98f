//! FBO control surface.
//!
//! One [`FboControl`] exists per physical device. Every operation that
//! reaches the device runs with the device lock held, checks operator
//! access, and holds a runtime power reference for the duration of the
//! transport calls:
//!
//! ```text
//! lock -> access check -> power get -> transport ... -> power put -> unlock
//! ```
//!
//! Operator input is validated before any of that happens.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::DeviceCapabilities;
use crate::codec::{get_be24, get_be32, MAX_EXEC_THRESHOLD};
use crate::command::Dispatcher;
use crate::config::FboConfig;
use crate::error::{FboError, FboResult, ValidationError};
use crate::range::{RangeRequest, FBO_RW_BUF_HDR_SIZE, FBO_RW_ENTRY_SIZE};
use crate::state::ProgressState;
use crate::transport::{PowerGuard, UfsTransport};

/// Operation counters for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FboStats {
    /// Progress-state queries issued.
    pub state_queries: u64,
    /// Range lists accepted by the device.
    pub ranges_submitted: u64,
    /// Fragmentation reports read.
    pub reports_read: u64,
    /// Threshold changes accepted by the device.
    pub threshold_updates: u64,
    /// Operations rejected for bad input or progress state.
    pub rejected: u64,
    /// Operations rejected because the device was not accessible.
    pub busy: u64,
    /// Transport failures.
    pub transport_errors: u64,
}

struct ControlInner {
    caps: DeviceCapabilities,
    pending_ranges: usize,
    stats: FboStats,
}

/// Per-device FBO control state.
pub struct FboControl<T: UfsTransport> {
    transport: Arc<T>,
    dispatcher: Dispatcher<T>,
    config: FboConfig,
    inner: Mutex<ControlInner>,
}

impl<T: UfsTransport> FboControl<T> {
    /// Creates the control state for a probed device.
    pub fn new(transport: Arc<T>, caps: DeviceCapabilities, config: FboConfig) -> Self {
        let dispatcher = Dispatcher::new(transport.clone(), config.command_timeout());
        Self {
            transport,
            dispatcher,
            config,
            inner: Mutex::new(ControlInner {
                caps,
                pending_ranges: 0,
                stats: FboStats::default(),
            }),
        }
    }

    /// Snapshot of the device capabilities.
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.inner.lock().caps
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> FboStats {
        self.inner.lock().stats.clone()
    }

    /// Number of ranges accepted by the last successful submission.
    pub fn pending_ranges(&self) -> usize {
        self.inner.lock().pending_ranges
    }

    /// Cached execution threshold. Does not touch the device.
    pub fn get_threshold(&self) -> u8 {
        self.inner.lock().caps.threshold()
    }

    /// Reads the current progress state from the device.
    pub fn get_progress_state(&self) -> FboResult<ProgressState> {
        self.with_device(|inner| {
            inner.stats.state_queries += 1;
            ProgressState::query(self.transport.as_ref(), self.config.progress_attr_idn)
        })
    }

    /// Writes the FBO control attribute. Not gated on progress state.
    pub fn set_operation_control(&self, value: u32) -> FboResult<()> {
        self.with_device(|_| {
            self.transport
                .write_attribute(self.config.control_attr_idn, value)?;
            info!(value, "FBO operation control written");
            Ok(())
        })
    }

    /// Changes the execution threshold.
    ///
    /// Values above 10 are rejected before the device is contacted. The
    /// device must be idle or have completed a pass.
    pub fn set_threshold(&self, value: u32) -> FboResult<()> {
        if value > MAX_EXEC_THRESHOLD {
            warn!(value, "execution threshold out of range");
            self.inner.lock().stats.rejected += 1;
            return Err(ValidationError::ThresholdOutOfRange(value).into());
        }

        self.with_device(|inner| {
            inner.stats.state_queries += 1;
            let state =
                ProgressState::query(self.transport.as_ref(), self.config.progress_attr_idn)?;
            if !state.permits_threshold_change() {
                warn!(?state, "illegal FBO progress state for threshold change");
                return Err(FboError::IllegalState(state));
            }

            self.transport
                .write_attribute(self.config.threshold_attr_idn, value)?;
            inner.caps.set_threshold(value as u8);
            inner.stats.threshold_updates += 1;
            info!(value, "FBO execution threshold updated");
            Ok(())
        })
    }

    /// Validates `text` and sends the ranges to the device.
    ///
    /// Only permitted while the device is idle. Returns the number of
    /// ranges accepted.
    pub fn submit_ranges(&self, text: &str) -> FboResult<usize> {
        let caps = self.capabilities();
        let payload = RangeRequest::parse(text, &caps)
            .map_err(FboError::from)
            .and_then(|request| {
                let payload = request.to_payload(self.config.staging_buffer_len)?;
                Ok((request.len(), payload))
            });
        let (count, payload) = match payload {
            Ok(p) => p,
            Err(e) => {
                self.inner.lock().stats.rejected += 1;
                return Err(e);
            }
        };

        self.with_device(|inner| {
            inner.stats.state_queries += 1;
            let state =
                ProgressState::query(self.transport.as_ref(), self.config.progress_attr_idn)?;
            if !state.permits_range_submit() {
                warn!(?state, "illegal FBO progress state for range submission");
                return Err(FboError::IllegalState(state));
            }

            self.dispatcher.submit_write(&payload)?;
            inner.pending_ranges = count;
            inner.stats.ranges_submitted += count as u64;
            info!(count, "FBO LBA ranges submitted");
            Ok(count)
        })
    }

    /// Reads back the per-range fragmentation state for the last submission.
    pub fn get_fragmentation_report(&self) -> FboResult<FragmentationReport> {
        self.with_device(|inner| {
            let count = inner.pending_ranges;
            let len = RangeRequest::payload_len_for(count);
            if len > self.config.staging_buffer_len {
                return Err(FboError::OutOfMemory {
                    requested: len,
                    limit: self.config.staging_buffer_len,
                });
            }

            let buf = self.dispatcher.submit_read(len)?;
            inner.stats.reports_read += 1;
            debug!(count, len, "FBO fragmentation report read");
            Ok(FragmentationReport::from_buffer(&buf, count))
        })
    }

    fn with_device<R>(
        &self,
        op: impl FnOnce(&mut ControlInner) -> FboResult<R>,
    ) -> FboResult<R> {
        let mut inner = self.inner.lock();
        if !self.transport.is_user_access_allowed() {
            inner.stats.busy += 1;
            warn!("FBO operation rejected: device not accessible");
            return Err(FboError::Busy);
        }

        let result = {
            let _power = PowerGuard::new(self.transport.as_ref());
            op(&mut *inner)
        };
        match &result {
            Err(FboError::Transport(_)) => inner.stats.transport_errors += 1,
            Err(FboError::IllegalState(_)) | Err(FboError::Decode(_)) => {
                inner.stats.rejected += 1
            }
            _ => {}
        }
        result
    }
}

/// One entry of a READ BUFFER response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentationEntry {
    /// Start LBA echoed by the device.
    pub start_lba: u32,
    /// Range length echoed by the device.
    pub length: u32,
    /// Device-reported fragmentation level.
    pub level: u8,
}

/// READ BUFFER body: the reserved slot followed by one entry per range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentationReport {
    body: Vec<u8>,
}

impl FragmentationReport {
    /// Extracts the body for `count` ranges; missing bytes read as zero.
    pub fn from_buffer(buf: &[u8], count: usize) -> Self {
        let body_len = FBO_RW_ENTRY_SIZE + count * FBO_RW_ENTRY_SIZE;
        let mut body = vec![0u8; body_len];
        if let Some(src) = buf.get(FBO_RW_BUF_HDR_SIZE..) {
            let n = src.len().min(body_len);
            body[..n].copy_from_slice(&src[..n]);
        }
        Self { body }
    }

    /// Raw body bytes, header excluded.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decoded range entries, reserved slot excluded.
    pub fn entries(&self) -> Vec<FragmentationEntry> {
        self.body[FBO_RW_ENTRY_SIZE..]
            .chunks_exact(FBO_RW_ENTRY_SIZE)
            .map(|e| FragmentationEntry {
                start_lba: get_be32(e, 0),
                length: get_be24(e, 4),
                level: e[7],
            })
            .collect()
    }
}

impl fmt::Display for FragmentationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.body.iter().enumerate() {
            write!(f, "{:02x}  ", byte)?;
            if (i + 1) % 8 == 0 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
