#![warn(missing_docs)]

//! UFS File-Based Optimization (FBO) control path.
//!
//! This crate probes a device's FBO capability descriptor, gates operator
//! requests on the device-reported progress state, and issues the vendor
//! READ BUFFER / WRITE BUFFER commands that carry LBA range lists. The host
//! controller's query, command and power-management services are consumed
//! through the [`UfsTransport`] trait.

pub mod attrs;
pub mod capability;
pub mod codec;
pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod mock;
pub mod range;
pub mod state;
pub mod transport;

pub use attrs::{AttrMode, FboAttribute, ATTRIBUTE_GROUP};
pub use capability::{probe, DeviceCapabilities};
pub use codec::{decode_capabilities, decode_progress_state, encode_descriptor, FboDescriptor};
pub use command::{BufferCommand, Dispatcher};
pub use config::FboConfig;
pub use control::{FboControl, FboStats, FragmentationEntry, FragmentationReport};
pub use error::{DecodeError, FboError, FboResult, TransportError, ValidationError};
pub use host::UfsHost;
pub use mock::{DeviceProfile, MockUfsDevice, TransportCall};
pub use range::{LbaRange, RangeRequest};
pub use state::ProgressState;
pub use transport::{DataDirection, PowerGuard, SenseData, UfsTransport};
