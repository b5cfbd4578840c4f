use std::path::Path;
use std::time::Duration;

use lwmav_transport::TransportParams;
use serde::{Deserialize, Serialize};

use crate::connection::{DEFAULT_COMPONENT_ID, DEFAULT_SYSTEM_ID};
use crate::error::{Error, Result};
use crate::pool::POOL_CAPACITY;
use crate::registry::REGISTRY_CAPACITY;

/// Default remote system/component addressed by commands.
pub const DEFAULT_TARGET_SYSTEM: u8 = 1;
pub const DEFAULT_TARGET_COMPONENT: u8 = 1;

/// Timeout used by the synchronous convenience commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Vehicle identity, table sizes and (optionally) the link to open.
///
/// Loaded from JSON; every field has a default, so `{}` is a valid config.
///
/// ```json
/// {
///   "system_id": 255,
///   "target_system": 1,
///   "transport": { "type": "udp", "port": 14550 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VehicleConfig {
    pub system_id: u8,
    pub component_id: u8,
    pub target_system: u8,
    pub target_component: u8,
    pub pool_capacity: usize,
    pub registry_capacity: usize,
    /// Milliseconds; applies to the synchronous convenience commands.
    pub command_timeout_ms: u64,
    pub transport: Option<TransportParams>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            system_id: DEFAULT_SYSTEM_ID,
            component_id: DEFAULT_COMPONENT_ID,
            target_system: DEFAULT_TARGET_SYSTEM,
            target_component: DEFAULT_TARGET_COMPONENT,
            pool_capacity: POOL_CAPACITY,
            registry_capacity: REGISTRY_CAPACITY,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            transport: None,
        }
    }
}

impl VehicleConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.system_id == 0 {
            return Err(Error::BadParam("system_id must be non-zero".into()));
        }
        if self.pool_capacity == 0 || self.pool_capacity > u32::MAX as usize {
            return Err(Error::BadParam(format!(
                "pool_capacity {} out of range",
                self.pool_capacity
            )));
        }
        if self.registry_capacity == 0 {
            return Err(Error::BadParam("registry_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
