//! AMOLED family: command tables for every transition, low-power display
//! mode, and an activity readback used by the black-screen check.

use super::{
    CommandLink, CommandTable, DisplayMode, PanelFamily, pack_id, send_optional, send_table,
};
use crate::error::PanelError;

pub struct OledFamily<L> {
    link: L,
    modes: &'static [DisplayMode],
}

impl<L: CommandLink> OledFamily<L> {
    #[must_use]
    pub const fn new(link: L, modes: &'static [DisplayMode]) -> Self {
        Self { link, modes }
    }

    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }
}

impl<L: CommandLink> PanelFamily for OledFamily<L> {
    fn name(&self) -> &'static str {
        "oled"
    }

    async fn read_panel_id(&mut self) -> Result<u32, PanelError> {
        match self.link.read_id().await {
            Ok(bytes) => Ok(pack_id(bytes)),
            Err(err) => {
                panel_warn!("oled: panel id read failed: {}", err);
                Ok(0)
            }
        }
    }

    async fn init_interface(&mut self) -> Result<(), PanelError> {
        send_optional(&mut self.link, CommandTable::InterfaceInit).await
    }

    async fn init_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::Init).await
    }

    async fn exit_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::Exit).await
    }

    async fn display_on_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::DisplayOn).await
    }

    async fn display_off_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::DisplayOff).await
    }

    async fn alpm_enter_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::AlpmEnter).await
    }

    async fn alpm_exit_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::AlpmExit).await
    }

    async fn check_condition(&mut self) -> Result<(), PanelError> {
        send_optional(&mut self.link, CommandTable::CheckCondition).await
    }

    async fn activity_metric(&mut self) -> Result<Option<u32>, PanelError> {
        match self.link.read_activity().await {
            Ok(value) => Ok(Some(value)),
            Err(crate::error::HardwareError::Unsupported) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve_display_mode(&self, index: u16) -> Result<DisplayMode, PanelError> {
        self.modes
            .iter()
            .find(|mode| mode.index == index)
            .copied()
            .ok_or(PanelError::InvalidArgument)
    }

    async fn apply_display_mode(&mut self, mode: DisplayMode) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::DisplayMode(mode.index)).await
    }

    async fn dump(&mut self) -> Result<(), PanelError> {
        send_optional(&mut self.link, CommandTable::Dump).await
    }
}
