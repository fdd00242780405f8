//! TFT-LCD family: no low-power display mode and no activity readback.

use super::{CommandLink, CommandTable, PanelFamily, pack_id, send_optional, send_table};
use crate::error::PanelError;

pub struct LcdFamily<L> {
    link: L,
}

impl<L: CommandLink> LcdFamily<L> {
    #[must_use]
    pub const fn new(link: L) -> Self {
        Self { link }
    }
}

impl<L: CommandLink> PanelFamily for LcdFamily<L> {
    fn name(&self) -> &'static str {
        "lcd"
    }

    async fn read_panel_id(&mut self) -> Result<u32, PanelError> {
        // LCD drivers without an ID register report a fixed non-zero code.
        Ok(self.link.read_id().await.map_or(1, pack_id))
    }

    async fn init_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::Init).await
    }

    async fn exit_commands(&mut self) -> Result<(), PanelError> {
        send_optional(&mut self.link, CommandTable::Exit).await
    }

    async fn display_on_commands(&mut self) -> Result<(), PanelError> {
        send_table(&mut self.link, CommandTable::DisplayOn).await
    }

    async fn display_off_commands(&mut self) -> Result<(), PanelError> {
        send_optional(&mut self.link, CommandTable::DisplayOff).await
    }

    async fn dump(&mut self) -> Result<(), PanelError> {
        send_optional(&mut self.link, CommandTable::Dump).await
    }
}
