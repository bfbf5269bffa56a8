use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Vendor id the reference firmware reports in its USB descriptor (test allocation).
pub const DEFAULT_VENDOR_ID: u16 = 0xcafe;
pub const DEFAULT_PRODUCT_ID: u16 = 0x4000;

const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 3000;
const DEFAULT_USER_PRESENCE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_USER_PRESENCE_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_AUTHENTICATION_ROUNDS: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Exact vendor/product pair a device must report to be tested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSelector {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceSelector {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Upper bound on a single request/response exchange, enforced by the transport.
    pub transaction_timeout_ms: u64,
    /// How long to keep asking while the device waits for a touch.
    pub user_presence_timeout_ms: u64,
    pub user_presence_poll_interval_ms: u64,
    /// Number of Authenticate calls made against the registered key handle.
    pub authentication_rounds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            user_presence_timeout_ms: DEFAULT_USER_PRESENCE_TIMEOUT_MS,
            user_presence_poll_interval_ms: DEFAULT_USER_PRESENCE_POLL_INTERVAL_MS,
            authentication_rounds: DEFAULT_AUTHENTICATION_ROUNDS,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authentication_rounds == 0 {
            return Err(ConfigError::Invalid("authentication_rounds must be at least 1"));
        }
        if self.transaction_timeout_ms == 0 {
            return Err(ConfigError::Invalid("transaction_timeout_ms must be positive"));
        }
        if self.user_presence_timeout_ms == 0 {
            return Err(ConfigError::Invalid("user_presence_timeout_ms must be positive"));
        }
        if self.user_presence_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "user_presence_poll_interval_ms must be positive",
            ));
        }
        Ok(())
    }

    pub fn device_selector(&self) -> DeviceSelector {
        DeviceSelector {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn user_presence_timeout(&self) -> Duration {
        Duration::from_millis(self.user_presence_timeout_ms)
    }

    pub fn user_presence_poll_interval(&self) -> Duration {
        Duration::from_millis(self.user_presence_poll_interval_ms)
    }

    /// Longest a single transport exchange may block, keep-alives included.
    pub fn exchange_ceiling(&self) -> Duration {
        self.transaction_timeout() + self.user_presence_timeout()
    }
}
