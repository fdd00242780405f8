//! Per-device tunables supplied by the composition root.

use core::time::Duration;

/// Attempts made when polling display-detect or crack-detect after init.
pub const DEFAULT_POLL_ATTEMPTS: u8 = 20;
/// Spacing between poll attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Debounce applied by every pin worker before re-sampling.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(10);
/// Full init retries performed by sleep-out before giving up.
pub const DEFAULT_SLEEP_OUT_RETRIES: u8 = 3;
/// Settle time between the power-off and power-on of a retry cycle.
pub const DEFAULT_RETRY_SETTLE: Duration = Duration::from_millis(100);
/// Settle time after display-detect forced a power-off.
pub const DEFAULT_FORCED_OFF_SETTLE: Duration = Duration::from_millis(300);

/// What the command-error-flag worker does when the flag trips.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrFlagPolicy {
    /// Invoke the registered recovery callback.
    pub recovery: bool,
    /// Invoke the registered power-down callback (takes precedence).
    pub powerdown: bool,
}

impl ErrFlagPolicy {
    /// Returns `true` when the worker has something to do.
    #[must_use]
    pub const fn is_active(self) -> bool {
        self.recovery || self.powerdown
    }
}

/// Device configuration resolved before construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PanelConfig {
    /// Owner name used to look up power-control sequences.
    pub owner: &'static str,
    pub poll_attempts: u8,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub sleep_out_retries: u8,
    pub retry_settle: Duration,
    pub forced_off_settle: Duration,
    pub err_flag: ErrFlagPolicy,
    /// Emit a connector uevent notice on disconnect.
    pub connector_uevent: bool,
}

impl PanelConfig {
    /// Configuration with default tunables for the given sequence owner.
    #[must_use]
    pub const fn new(owner: &'static str) -> Self {
        Self {
            owner,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
            sleep_out_retries: DEFAULT_SLEEP_OUT_RETRIES,
            retry_settle: DEFAULT_RETRY_SETTLE,
            forced_off_settle: DEFAULT_FORCED_OFF_SETTLE,
            err_flag: ErrFlagPolicy {
                recovery: false,
                powerdown: false,
            },
            connector_uevent: false,
        }
    }

    /// Replaces the command-error-flag policy.
    #[must_use]
    pub const fn with_err_flag(mut self, policy: ErrFlagPolicy) -> Self {
        self.err_flag = policy;
        self
    }

    /// Enables the connector uevent notice.
    #[must_use]
    pub const fn with_connector_uevent(mut self, enabled: bool) -> Self {
        self.connector_uevent = enabled;
        self
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::new("panel")
    }
}
