//! Driver configuration and protocol constants.

use alloc::string::String;

use crate::error::ConfigError;

/// Maximum number of amplifier channels one blob may describe.
pub const MAX_CHANNELS: usize = 4;

/// Highest blob header version this implementation parses.
pub const MAX_SUPPORTED_VERSION: u32 = 3;

/// Tunables for loading, deferred work and interrupt handling.
///
/// ```
/// use smartamp::config::DriverConfig;
///
/// let cfg = DriverConfig {
///     revision_id: 2,
///     ..DriverConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriverConfig {
    /// Name passed to the firmware provider.
    pub firmware_name: String,
    /// Revision selected from an `MDATA` container.
    pub revision_id: u32,
    /// Load attempts at probe time.
    pub load_tries: u32,
    /// Load attempts for a lazy load triggered by first use.
    pub lazy_load_tries: u32,
    /// Sleep between retryable load failures.
    pub load_retry_delay_ms: u64,
    /// Delay between `→Active` and the deferred post-power-up task.
    pub post_power_up_delay_ms: u64,
    /// Delay between an interrupt notification and the recovery pass.
    pub irq_debounce_delay_ms: u64,
    /// Detections within the window beyond which a channel is stuck.
    pub irq_storm_limit: u32,
    /// Storm detection window.
    pub irq_storm_window_ms: u64,
    /// Hardware reset + re-init attempts before locking channels out.
    pub max_auto_restarts: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            firmware_name: String::from("smartamp-tuning.bin"),
            revision_id: 0,
            load_tries: 3,
            lazy_load_tries: 1,
            load_retry_delay_ms: 100,
            post_power_up_delay_ms: 10,
            irq_debounce_delay_ms: 5,
            irq_storm_limit: 500,
            irq_storm_window_ms: 30_000,
            max_auto_restarts: 3,
        }
    }
}

impl DriverConfig {
    /// Check field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.firmware_name.is_empty() {
            return Err(ConfigError::EmptyFirmwareName);
        }
        if self.load_tries == 0 {
            return Err(ConfigError::ZeroTries("load_tries"));
        }
        if self.lazy_load_tries == 0 {
            return Err(ConfigError::ZeroTries("lazy_load_tries"));
        }
        if self.irq_storm_limit == 0 || self.irq_storm_window_ms == 0 {
            return Err(ConfigError::ZeroStormLimit);
        }
        Ok(())
    }
}
