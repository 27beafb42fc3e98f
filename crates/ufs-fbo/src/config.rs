//! Runtime configuration for the FBO control path.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{
    QUERY_ATTR_IDN_FBO_CONTROL, QUERY_ATTR_IDN_FBO_LEVEL_EXE, QUERY_ATTR_IDN_FBO_PROG_STATE,
    QUERY_DESC_IDN_FBO,
};
use crate::error::{FboError, FboResult};
use crate::range::{FBO_RW_BUF_HDR_SIZE, FBO_RW_ENTRY_SIZE};

/// Configuration for one FBO control instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FboConfig {
    /// Timeout for READ BUFFER / WRITE BUFFER in milliseconds.
    pub command_timeout_ms: u64,
    /// Size of the staging buffer for buffer commands.
    pub staging_buffer_len: usize,
    /// Descriptor IDN of the FBO descriptor.
    pub descriptor_idn: u8,
    /// Attribute IDN of the execution threshold.
    pub threshold_attr_idn: u8,
    /// Attribute IDN of the progress state.
    pub progress_attr_idn: u8,
    /// Attribute IDN of the operation control.
    pub control_attr_idn: u8,
}

impl Default for FboConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 15_000,
            staging_buffer_len: 4096,
            descriptor_idn: QUERY_DESC_IDN_FBO,
            threshold_attr_idn: QUERY_ATTR_IDN_FBO_LEVEL_EXE,
            progress_attr_idn: QUERY_ATTR_IDN_FBO_PROG_STATE,
            control_attr_idn: QUERY_ATTR_IDN_FBO_CONTROL,
        }
    }
}

impl FboConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> FboResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FboError::Config(format!("{}: {}", path.display(), e)))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: FboConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| FboError::Config(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| FboError::Config(e.to_string()))?
            }
            _ => {
                return Err(FboError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects a zero timeout and staging buffers that cannot hold one range.
    pub fn validate(&self) -> FboResult<()> {
        if self.command_timeout_ms == 0 {
            return Err(FboError::Config("command_timeout_ms must be non-zero".into()));
        }
        let min_len = FBO_RW_BUF_HDR_SIZE + 2 * FBO_RW_ENTRY_SIZE;
        if self.staging_buffer_len < min_len {
            return Err(FboError::Config(format!(
                "staging_buffer_len {} below minimum {}",
                self.staging_buffer_len, min_len
            )));
        }
        Ok(())
    }

    /// Command timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_default_values() {
        let config = FboConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(15));
        assert_eq!(config.staging_buffer_len, 4096);
        assert_eq!(config.descriptor_idn, 0x0a);
        assert_eq!(config.threshold_attr_idn, 0x32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "command_timeout_ms = 30000").unwrap();

        let config = FboConfig::from_file(file.path()).unwrap();
        assert_eq!(config.command_timeout_ms, 30000);
        assert_eq!(config.staging_buffer_len, 4096);
    }

    #[test]
    fn test_from_json() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"staging_buffer_len": 8192}}"#).unwrap();

        let config = FboConfig::from_file(file.path()).unwrap();
        assert_eq!(config.staging_buffer_len, 8192);
        assert_eq!(config.command_timeout_ms, 15_000);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = FboConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, FboError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_tiny_staging_buffer() {
        let config = FboConfig {
            staging_buffer_len: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_staging_buffer_fits_one_range() {
        let exact = FboConfig {
            staging_buffer_len: 20,
            ..Default::default()
        };
        assert!(exact.validate().is_ok());
        let short = FboConfig {
            staging_buffer_len: 19,
            ..Default::default()
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = FboConfig {
            command_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
