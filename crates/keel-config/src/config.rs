//! The root configuration type.

use crate::{ConfigError, ConfigResult, LoggingConfig, OpsConfig};
use keel_core::{Endpoint, Network};
use serde::{Deserialize, Serialize};

/// Complete Keel process configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables over the defaults.
///
/// ```
/// use keel_config::KeelConfig;
///
/// let config = KeelConfig::default();
/// assert_eq!(config.ops.addr, ":6060");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    /// Operational HTTP server.
    #[serde(default)]
    pub ops: OpsConfig,

    /// Process logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KeelConfig {
    /// Checks values that deserialization alone cannot.
    ///
    /// The ops address is only checked when the ops server is enabled.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.ops.disable {
            Endpoint::parse(Network::Tcp, &self.ops.addr)
                .map_err(|e| ConfigError::invalid_value("ops.addr", e.to_string()))?;
        }
        Ok(())
    }
}
