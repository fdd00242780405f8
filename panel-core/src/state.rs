//! Panel state owned by the active-state machine.

use core::fmt;

use crate::pins::PinState;

/// Lifecycle position of the panel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActiveState {
    /// Supplies off. Construction default and terminal state.
    Off,
    /// Supplies on, panel asleep.
    On,
    /// Panel awake and scanning out.
    Normal,
    /// Low-power (doze) display mode.
    Lpm,
}

impl ActiveState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ActiveState::Off => "OFF",
            ActiveState::On => "ON",
            ActiveState::Normal => "NORMAL",
            ActiveState::Lpm => "LPM",
        }
    }

    /// `NORMAL` or `LPM`: display content is meaningful.
    #[must_use]
    pub const fn is_display_active(self) -> bool {
        matches!(self, ActiveState::Normal | ActiveState::Lpm)
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Off,
    On,
}

/// Connector status as last sampled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Connection {
    /// No connector-detect pin on this board.
    Unsupported,
    Connected,
    Disconnected,
}

impl Connection {
    /// Maps an optional connector-detect reading.
    #[must_use]
    pub const fn from_sample(sample: Option<PinState>) -> Self {
        match sample {
            None => Connection::Unsupported,
            Some(PinState::Ok) => Connection::Connected,
            Some(PinState::Nok) => Connection::Disconnected,
        }
    }

    #[must_use]
    pub const fn is_disconnected(self) -> bool {
        matches!(self, Connection::Disconnected)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Connection::Unsupported => "unsupported",
            Connection::Connected => "connected",
            Connection::Disconnected => "disconnected",
        })
    }
}

/// Mutable panel state guarded by the state lock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PanelState {
    pub active: ActiveState,
    pub power: PowerState,
    pub display_on: bool,
    pub bypass: bool,
    pub connected: Connection,
    /// Set when crack-detect keeps failing; the display controller stops
    /// waiting for tearing-effect timing.
    pub ignore_frame_timing: bool,
    /// Identifier read at probe time, `0` when the read failed.
    pub panel_id: u32,
}

impl PanelState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: ActiveState::Off,
            power: PowerState::Off,
            display_on: false,
            bypass: false,
            connected: Connection::Connected,
            ignore_frame_timing: false,
            panel_id: 0,
        }
    }
}

impl Default for PanelState {
    fn default() -> Self {
        Self::new()
    }
}
