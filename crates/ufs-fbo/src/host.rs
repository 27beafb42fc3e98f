//! Host-side owner of the per-device FBO state.
//!
//! The host controller probes FBO once the device descriptor is known and
//! keeps the resulting [`FboControl`] for the lifetime of the device.

use std::sync::Arc;

use tracing::{info, warn};

use crate::capability;
use crate::codec;
use crate::config::FboConfig;
use crate::control::FboControl;
use crate::error::{FboError, FboResult};
use crate::transport::UfsTransport;

/// A UFS host adapter with optional FBO support.
pub struct UfsHost<T: UfsTransport> {
    transport: Arc<T>,
    config: FboConfig,
    fbo: Option<FboControl<T>>,
}

impl<T: UfsTransport> UfsHost<T> {
    /// Creates a host without FBO state. Call [`UfsHost::probe_fbo`] to enable it.
    pub fn new(transport: Arc<T>, config: FboConfig) -> Self {
        Self {
            transport,
            config,
            fbo: None,
        }
    }

    /// Probes FBO from the device descriptor.
    ///
    /// On any error FBO stays disabled for this device.
    pub fn probe_fbo(&mut self, device_desc: &[u8]) -> FboResult<()> {
        self.fbo = None;

        let ext_features = codec::ext_feature_bitmap(device_desc)?;
        match capability::probe(ext_features, self.transport.as_ref(), &self.config) {
            Ok(caps) => {
                self.fbo = Some(FboControl::new(
                    self.transport.clone(),
                    caps,
                    self.config.clone(),
                ));
                info!("FBO enabled");
                Ok(())
            }
            Err(FboError::NotSupported) => {
                info!("FBO not supported");
                Err(FboError::NotSupported)
            }
            Err(e) => {
                warn!(error = %e, "FBO probe failed, feature disabled");
                Err(e)
            }
        }
    }

    /// Drops the FBO state, e.g. when the device detaches.
    pub fn remove_fbo(&mut self) {
        if self.fbo.take().is_some() {
            info!("FBO removed");
        }
    }

    /// Whether the device has FBO state.
    pub fn fbo_supported(&self) -> bool {
        self.fbo.is_some()
    }

    /// The FBO control state, if probed successfully.
    pub fn fbo(&self) -> Option<&FboControl<T>> {
        self.fbo.as_ref()
    }

    /// The FBO control state, or [`FboError::NotSupported`].
    pub fn require_fbo(&self) -> FboResult<&FboControl<T>> {
        self.fbo.as_ref().ok_or(FboError::NotSupported)
    }
}
