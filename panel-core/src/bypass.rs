//! Bypass policy: why a panel has been excluded from further operations.
//!
//! The reason is derived from live signals rather than stored, so it always
//! reflects the hardware that kept the panel bypassed.

use core::fmt;

use crate::pins::PinState;

/// Cause reported for a bypassed panel, in decreasing priority.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BypassReason {
    None,
    ConnectorDisconnected,
    SupplyLowAfterSleepOut,
    PanelIdReadFailure,
    CrackDetected,
}

impl BypassReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BypassReason::None => "none",
            BypassReason::ConnectorDisconnected => "display connector is disconnected",
            BypassReason::SupplyLowAfterSleepOut => "AVDD_SWIRE is off after SLPOUT",
            BypassReason::PanelIdReadFailure => "panel id read failure",
            BypassReason::CrackDetected => "panel crack detected",
        }
    }
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals sampled when a reason is requested. `None` pins are not wired.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BypassSignals {
    pub bypass: bool,
    pub connector: Option<PinState>,
    pub disp_det: Option<PinState>,
    pub panel_id: u32,
    pub pcd: Option<PinState>,
}

fn abnormal(state: Option<PinState>) -> bool {
    matches!(state, Some(PinState::Nok))
}

/// Picks the highest-priority reason; [`BypassReason::None`] when not bypassed.
#[must_use]
pub fn evaluate(signals: &BypassSignals) -> BypassReason {
    if !signals.bypass {
        return BypassReason::None;
    }

    if abnormal(signals.connector) {
        BypassReason::ConnectorDisconnected
    } else if abnormal(signals.disp_det) {
        BypassReason::SupplyLowAfterSleepOut
    } else if signals.panel_id == 0 {
        BypassReason::PanelIdReadFailure
    } else if abnormal(signals.pcd) {
        BypassReason::CrackDetected
    } else {
        BypassReason::None
    }
}

/// Human-readable bypass status, e.g. `bypass:on(reason:panel crack detected)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BypassReport {
    pub bypass: bool,
    pub reason: BypassReason,
}

impl fmt::Display for BypassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bypass {
            write!(f, "bypass:on(reason:{})", self.reason)
        } else {
            f.write_str("bypass:off")
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::string::ToString;

    fn bypassed() -> BypassSignals {
        BypassSignals {
            bypass: true,
            connector: Some(PinState::Ok),
            disp_det: Some(PinState::Ok),
            panel_id: 0x00A1_2345,
            pcd: Some(PinState::Ok),
        }
    }

    #[test]
    fn not_bypassed_has_no_reason() {
        let signals = BypassSignals {
            bypass: false,
            connector: Some(PinState::Nok),
            ..bypassed()
        };
        assert_eq!(evaluate(&signals), BypassReason::None);
    }

    #[test]
    fn connector_outranks_every_other_signal() {
        let signals = BypassSignals {
            connector: Some(PinState::Nok),
            disp_det: Some(PinState::Nok),
            panel_id: 0,
            pcd: Some(PinState::Nok),
            ..bypassed()
        };
        assert_eq!(evaluate(&signals), BypassReason::ConnectorDisconnected);
    }

    #[test]
    fn priority_walks_down_the_list() {
        let mut signals = BypassSignals {
            disp_det: Some(PinState::Nok),
            panel_id: 0,
            pcd: Some(PinState::Nok),
            ..bypassed()
        };
        assert_eq!(evaluate(&signals), BypassReason::SupplyLowAfterSleepOut);

        signals.disp_det = Some(PinState::Ok);
        assert_eq!(evaluate(&signals), BypassReason::PanelIdReadFailure);

        signals.panel_id = 1;
        assert_eq!(evaluate(&signals), BypassReason::CrackDetected);

        signals.pcd = None;
        assert_eq!(evaluate(&signals), BypassReason::None);
    }

    #[test]
    fn unwired_pins_never_report_a_reason() {
        let signals = BypassSignals {
            connector: None,
            disp_det: None,
            pcd: None,
            ..bypassed()
        };
        assert_eq!(evaluate(&signals), BypassReason::None);
    }

    #[test]
    fn report_formats_reason_string() {
        let report = BypassReport {
            bypass: true,
            reason: BypassReason::CrackDetected,
        };
        assert_eq!(report.to_string(), "bypass:on(reason:panel crack detected)");

        let idle = BypassReport {
            bypass: false,
            reason: BypassReason::None,
        };
        assert_eq!(idle.to_string(), "bypass:off");
    }
}
