//! STM32G0 drivers behind the panel-core traits.

use core::time::Duration;

use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::Spi;
use embassy_time::{Instant, Timer};
use panel_core::HardwareError;
use panel_core::clock::PanelClock;
use panel_core::family::{CommandLink, CommandTable};
use panel_core::pins::{PinDriver, PinLevel};
use panel_core::power::{RegulatorDriver, RegulatorId};
use portable_atomic::{AtomicU32, Ordering};

use crate::board;

/// Last level seen on each monitored input.
///
/// The edge tasks own the `ExtiInput`s, so they publish levels here and the
/// pin driver reads them back. Bit `n` is GPIO number `n`.
pub struct LevelMirror {
    high: AtomicU32,
}

impl LevelMirror {
    pub const fn new() -> Self {
        Self {
            high: AtomicU32::new(0),
        }
    }

    pub fn store(&self, number: u32, high: bool) {
        let bit = 1 << number;
        if high {
            self.high.fetch_or(bit, Ordering::Release);
        } else {
            self.high.fetch_and(!bit, Ordering::Release);
        }
    }

    fn load(&self, number: u32) -> bool {
        self.high.load(Ordering::Acquire) & (1 << number) != 0
    }
}

/// Panel GPIOs: the reset output plus the mirrored inputs.
pub struct BoardPins {
    reset: Output<'static>,
    levels: &'static LevelMirror,
}

impl BoardPins {
    pub fn new(reset: Output<'static>, levels: &'static LevelMirror) -> Self {
        Self { reset, levels }
    }
}

impl PinDriver for BoardPins {
    fn read(&mut self, number: u32) -> Result<PinLevel, HardwareError> {
        match number {
            board::RESET => Ok(PinLevel::from_bool(self.reset.is_set_high())),
            board::DISP_DET | board::PCD | board::ERR_FG | board::CONN_DET => {
                Ok(PinLevel::from_bool(self.levels.load(number)))
            }
            _ => Err(HardwareError::Unsupported),
        }
    }

    fn write(&mut self, number: u32, level: PinLevel) -> Result<(), HardwareError> {
        if number != board::RESET {
            return Err(HardwareError::Unsupported);
        }
        if level.is_high() {
            self.reset.set_high();
        } else {
            self.reset.set_low();
        }
        Ok(())
    }

    fn set_irq_enabled(&mut self, _irq: u32, _enabled: bool) -> Result<(), HardwareError> {
        // EXTI lines stay armed; the bank gates delivery.
        Ok(())
    }

    fn clear_pending(&mut self, _irq: u32) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// Rails switched by load switches; level and limit are fixed in hardware.
pub struct LoadSwitches {
    vci: Output<'static>,
    vddi: Output<'static>,
}

impl LoadSwitches {
    pub fn new(vci: Output<'static>, vddi: Output<'static>) -> Self {
        Self { vci, vddi }
    }

    fn switch(&mut self, id: RegulatorId) -> Result<&mut Output<'static>, HardwareError> {
        match id.index() {
            0 => Ok(&mut self.vci),
            1 => Ok(&mut self.vddi),
            _ => Err(HardwareError::Rejected),
        }
    }
}

impl RegulatorDriver for LoadSwitches {
    fn enable(&mut self, id: RegulatorId) -> Result<(), HardwareError> {
        self.switch(id)?.set_high();
        Ok(())
    }

    fn disable(&mut self, id: RegulatorId) -> Result<(), HardwareError> {
        self.switch(id)?.set_low();
        Ok(())
    }

    fn set_voltage(&mut self, _id: RegulatorId, _microvolts: u32) -> Result<(), HardwareError> {
        Err(HardwareError::Unsupported)
    }

    fn set_current_limit(
        &mut self,
        _id: RegulatorId,
        _microamps: u32,
    ) -> Result<(), HardwareError> {
        Err(HardwareError::Unsupported)
    }
}

/// `embassy-time` backed clock.
pub struct EmbassyClock;

impl PanelClock for EmbassyClock {
    fn now(&self) -> Duration {
        Duration::from_micros(Instant::now().as_micros())
    }

    async fn sleep(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        Timer::after_micros(micros).await;
    }
}

/// Four-wire DBI link: SPI plus chip-select and data/command select.
pub struct SpiLink {
    spi: Spi<'static, Blocking>,
    cs: Output<'static>,
    dcx: Output<'static>,
}

impl SpiLink {
    pub fn new(spi: Spi<'static, Blocking>, cs: Output<'static>, dcx: Output<'static>) -> Self {
        Self { spi, cs, dcx }
    }

    fn command(&mut self, command: u8, params: &[u8]) -> Result<(), HardwareError> {
        self.cs.set_low();
        self.dcx.set_low();
        let mut result = self.spi.blocking_write(&[command]);
        if result.is_ok() && !params.is_empty() {
            self.dcx.set_high();
            result = self.spi.blocking_write(params);
        }
        self.cs.set_high();
        result.map_err(|_| HardwareError::Bus)
    }

    fn read(&mut self, command: u8, buf: &mut [u8]) -> Result<(), HardwareError> {
        self.cs.set_low();
        self.dcx.set_low();
        let mut result = self.spi.blocking_write(&[command]);
        if result.is_ok() {
            self.dcx.set_high();
            result = self.spi.blocking_read(buf);
        }
        self.cs.set_high();
        result.map_err(|_| HardwareError::Bus)
    }
}

impl CommandLink for SpiLink {
    fn has_table(&self, table: CommandTable) -> bool {
        !board::dcs_table(table).is_empty()
    }

    async fn send(&mut self, table: CommandTable) -> Result<(), HardwareError> {
        for &(command, params) in board::dcs_table(table) {
            self.command(command, params)?;
        }
        Ok(())
    }

    async fn read_id(&mut self) -> Result<[u8; 3], HardwareError> {
        let mut id = [0; 3];
        self.read(board::READ_ID, &mut id)?;
        Ok(id)
    }

    async fn read_activity(&mut self) -> Result<u32, HardwareError> {
        let mut level = [0; 1];
        self.read(board::READ_BRIGHTNESS, &mut level)?;
        Ok(u32::from(level[0]))
    }
}
