//! Error taxonomy shared by the pin layer, sequencing engine, and state machine.
//!
//! Pin-layer and engine errors travel unchanged to their caller. The state
//! machine turns hardware-class conditions into a bypass transition where the
//! panel can keep operating, and surfaces [`PanelError::FatalIntegration`] to
//! the top-level caller instead of halting anything itself.

use core::fmt;

/// Failure reported by a platform driver (GPIO, regulator, command link).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HardwareError {
    /// Bus or peripheral transaction failed.
    Bus,
    /// Operation is not wired on this board.
    Unsupported,
    /// Driver rejected the value (out of range voltage, unknown pin number).
    Rejected,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors surfaced by panel operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelError {
    /// Missing pin, descriptor, or dangling reference.
    InvalidArgument,
    /// Optional sequence or resource is absent, or the panel is not attached.
    NotFound,
    /// Feature not configured for this hardware variant.
    Unsupported,
    /// A bounded poll ran out of attempts.
    Timeout,
    /// Hardware reported a failure outside a sequence.
    HardwareFault(HardwareError),
    /// A sequence stopped at the action with the given index.
    SequenceActionFailed { index: u8, cause: HardwareError },
    /// Initialization keeps failing while crack-detect reports a healthy panel.
    FatalIntegration,
    /// A fixed-capacity table has no room left.
    RegistryFull,
}

impl PanelError {
    /// Returns `true` for the "optional thing does not exist" outcome.
    #[must_use]
    pub const fn is_optional_absence(self) -> bool {
        matches!(self, PanelError::NotFound)
    }

    /// Returns `true` when the failure should not be retried automatically.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, PanelError::FatalIntegration)
    }
}

impl From<HardwareError> for PanelError {
    fn from(value: HardwareError) -> Self {
        match value {
            HardwareError::Unsupported => PanelError::Unsupported,
            other => PanelError::HardwareFault(other),
        }
    }
}

impl fmt::Display for PanelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Treats [`PanelError::NotFound`] as success for optional sequences.
///
/// # Errors
///
/// Returns any error other than `NotFound` unchanged.
pub fn optional(result: Result<(), PanelError>) -> Result<(), PanelError> {
    match result {
        Err(PanelError::NotFound) => Ok(()),
        other => other,
    }
}
