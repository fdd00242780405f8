//! Per-family panel capabilities.
//!
//! A [`PanelFamily`] supplies the command-table hook points the state machine
//! calls during transitions (init, exit, display on/off, doze entry/exit,
//! diagnostics, display modes). The family is chosen when the device is
//! built and never swapped afterwards. Optional hooks default to
//! [`PanelError::Unsupported`] or to doing nothing, so a family only
//! implements what its hardware has.

use core::future::{Future, ready};

use crate::error::{HardwareError, PanelError};

pub mod lcd;
pub mod oled;

pub use lcd::LcdFamily;
pub use oled::OledFamily;

/// Resolution/refresh entry resolved by the display-mode subsystem.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayMode {
    pub index: u16,
    pub width: u16,
    pub height: u16,
    pub refresh_hz: u16,
}

impl DisplayMode {
    #[must_use]
    pub const fn new(index: u16, width: u16, height: u16, refresh_hz: u16) -> Self {
        Self {
            index,
            width,
            height,
            refresh_hz,
        }
    }
}

/// Capability interface implemented once per panel family.
pub trait PanelFamily {
    /// Family name used in logs.
    fn name(&self) -> &'static str;

    /// Reads the panel identifier; `0` means the read failed.
    fn read_panel_id(&mut self) -> impl Future<Output = Result<u32, PanelError>>;

    /// Probe-time preparation once the identifier is known.
    fn prepare(&mut self, _panel_id: u32) -> impl Future<Output = Result<(), PanelError>> {
        ready(Ok(()))
    }

    /// Command-interface bring-up ahead of the init table.
    fn init_interface(&mut self) -> impl Future<Output = Result<(), PanelError>> {
        ready(Ok(()))
    }

    /// Sleep-out and initial register programming.
    fn init_commands(&mut self) -> impl Future<Output = Result<(), PanelError>>;

    /// Sleep-in.
    fn exit_commands(&mut self) -> impl Future<Output = Result<(), PanelError>>;

    fn display_on_commands(&mut self) -> impl Future<Output = Result<(), PanelError>>;

    fn display_off_commands(&mut self) -> impl Future<Output = Result<(), PanelError>>;

    /// Enters the low-power display mode.
    fn alpm_enter_commands(&mut self) -> impl Future<Output = Result<(), PanelError>> {
        ready(Err(PanelError::Unsupported))
    }

    /// Leaves the low-power display mode.
    fn alpm_exit_commands(&mut self) -> impl Future<Output = Result<(), PanelError>> {
        ready(Err(PanelError::Unsupported))
    }

    /// Prints panel diagnostics (power mode, error registers).
    fn check_condition(&mut self) -> impl Future<Output = Result<(), PanelError>> {
        ready(Ok(()))
    }

    /// Brightness/activity metric; `Some(0)` reads as a black screen and
    /// `None` means the family cannot measure it.
    fn activity_metric(&mut self) -> impl Future<Output = Result<Option<u32>, PanelError>> {
        ready(Ok(None))
    }

    /// Resolves a requested mode index.
    ///
    /// # Errors
    ///
    /// [`PanelError::Unsupported`] by default, [`PanelError::InvalidArgument`]
    /// for unknown indices.
    fn resolve_display_mode(&self, _index: u16) -> Result<DisplayMode, PanelError> {
        Err(PanelError::Unsupported)
    }

    /// Programs a resolved mode on an awake panel.
    fn apply_display_mode(
        &mut self,
        _mode: DisplayMode,
    ) -> impl Future<Output = Result<(), PanelError>> {
        ready(Ok(()))
    }

    /// Dumps family registers for debugging.
    fn dump(&mut self) -> impl Future<Output = Result<(), PanelError>> {
        ready(Ok(()))
    }
}

/// Command tables a [`CommandLink`] knows how to transmit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandTable {
    InterfaceInit,
    Init,
    Exit,
    DisplayOn,
    DisplayOff,
    AlpmEnter,
    AlpmExit,
    CheckCondition,
    Dump,
    DisplayMode(u16),
}

/// Transport to the panel's command interface (MIPI DSI, SPI).
///
/// Table contents and packet encoding live behind this seam.
pub trait CommandLink {
    /// Returns `true` when the table is defined for this panel.
    fn has_table(&self, table: CommandTable) -> bool;

    /// Transmits a command table.
    fn send(&mut self, table: CommandTable) -> impl Future<Output = Result<(), HardwareError>>;

    /// Reads the three identifier bytes.
    fn read_id(&mut self) -> impl Future<Output = Result<[u8; 3], HardwareError>>;

    /// Reads the averaged on-panel pixel activity.
    fn read_activity(&mut self) -> impl Future<Output = Result<u32, HardwareError>> {
        ready(Err(HardwareError::Unsupported))
    }
}

/// Packs identifier bytes the way panels report them (`ID1 ID2 ID3`).
#[must_use]
pub const fn pack_id(bytes: [u8; 3]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

async fn send_table<L: CommandLink>(link: &mut L, table: CommandTable) -> Result<(), PanelError> {
    if !link.has_table(table) {
        return Err(PanelError::Unsupported);
    }
    link.send(table).await.map_err(PanelError::from)
}

async fn send_optional<L: CommandLink>(
    link: &mut L,
    table: CommandTable,
) -> Result<(), PanelError> {
    if link.has_table(table) {
        link.send(table).await.map_err(PanelError::from)
    } else {
        Ok(())
    }
}
