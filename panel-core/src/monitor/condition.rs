//! Frame-driven panel condition check.
//!
//! After each entry into `NORMAL` or `LPM` the first frame triggers one
//! diagnostics dump. In `NORMAL`, a panel that still reads black keeps being
//! sampled every [`CHECK_SAMPLE_PERIOD`] frames until [`CHECK_FRAME_LIMIT`],
//! where a warning is raised and the check stops.

use crate::state::ActiveState;

/// Frames counted before the check gives up.
pub const CHECK_FRAME_LIMIT: u16 = 100;
/// Sampling period while waiting for a black screen to light up.
pub const CHECK_SAMPLE_PERIOD: u16 = 10;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CheckState {
    None,
    PrintNormal,
    CheckNormal,
    PrintDoze,
}

/// What a frame-done event asks of the condition worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameVerdict {
    Idle,
    Dispatch,
    /// Frame limit reached while the screen still read black.
    BlackScreen,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConditionCheck {
    state: CheckState,
    frame_count: u16,
    armed: bool,
}

impl ConditionCheck {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: CheckState::None,
            frame_count: 0,
            armed: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> CheckState {
        self.state
    }

    #[must_use]
    pub const fn frame_count(&self) -> u16 {
        self.frame_count
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Starts a check for the state just entered.
    pub fn arm(&mut self, active: ActiveState) {
        self.frame_count = 0;
        self.state = match active {
            ActiveState::Normal => CheckState::PrintNormal,
            ActiveState::Lpm => CheckState::PrintDoze,
            ActiveState::Off | ActiveState::On => CheckState::None,
        };
        self.armed = self.state != CheckState::None;
    }

    /// Advances the frame counter.
    pub fn on_frame(&mut self) -> FrameVerdict {
        if !self.armed {
            return FrameVerdict::Idle;
        }

        if self.frame_count < CHECK_FRAME_LIMIT {
            self.frame_count += 1;
            let due = match self.state {
                CheckState::PrintNormal | CheckState::PrintDoze => self.frame_count == 1,
                CheckState::CheckNormal => self.frame_count % CHECK_SAMPLE_PERIOD == 0,
                CheckState::None => false,
            };
            return if due {
                FrameVerdict::Dispatch
            } else {
                FrameVerdict::Idle
            };
        }

        let verdict = if self.state == CheckState::CheckNormal {
            FrameVerdict::BlackScreen
        } else {
            FrameVerdict::Idle
        };
        self.clear();
        verdict
    }

    /// Work the condition worker should perform, if any.
    #[must_use]
    pub fn pending(&self) -> Option<CheckState> {
        (self.armed && self.state != CheckState::None).then_some(self.state)
    }

    /// Applies the worker result for `handled`; stale results are ignored.
    ///
    /// `black` is `Some(true)` when the activity metric read a black screen.
    pub fn complete(&mut self, handled: CheckState, black: Option<bool>) {
        if !self.armed || self.state != handled {
            return;
        }

        match (handled, black) {
            (CheckState::PrintNormal | CheckState::CheckNormal, Some(true)) => {
                self.state = CheckState::CheckNormal;
            }
            _ => self.clear(),
        }
    }
}

impl Default for ConditionCheck {
    fn default() -> Self {
        Self::new()
    }
}
