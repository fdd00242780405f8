#![allow(dead_code)]

use core::future::ready;
use core::time::Duration;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use panel_core::clock::PanelClock;
use panel_core::config::PanelConfig;
use panel_core::family::{CommandLink, CommandTable, DisplayMode, OledFamily};
use panel_core::pins::{IrqTrigger, PinBank, PinDriver, PinId, PinLevel, PinSpec, PinState};
use panel_core::power::{
    ActionSpec, PowerControl, RegulatorBank, RegulatorDriver, RegulatorId, SequenceSpec, names,
};
use panel_core::registry::PanelRegistry;
use panel_core::{HardwareError, PanelDevice};

pub const OWNER: &str = "panel0";

pub const PINS: &[PinSpec] = &[
    PinSpec::output("reset", 10, false),
    PinSpec::input("disp-det", 11, false).with_irq(IrqTrigger::FallingEdge),
    PinSpec::input("pcd", 12, false).with_irq(IrqTrigger::FallingEdge),
    PinSpec::input("err-fg", 13, false).with_irq(IrqTrigger::FallingEdge),
    PinSpec::input("conn-det", 14, true).with_irq(IrqTrigger::BothEdges),
];

pub const RAILS: &[&str] = &["vci", "vdd"];

const POWER_ON: &[ActionSpec] = &[
    ActionSpec::voltage("vci", 3_000_000),
    ActionSpec::regulator_on("vci"),
    ActionSpec::delay_ms(10),
    ActionSpec::regulator_on("vdd"),
    ActionSpec::delay_ms(10),
    ActionSpec::pin_on("reset"),
    ActionSpec::delay_ms(30),
];

const POWER_OFF: &[ActionSpec] = &[
    ActionSpec::pin_off("reset"),
    ActionSpec::regulator_off("vdd"),
    ActionSpec::delay_ms(1),
    ActionSpec::regulator_off("vci"),
];

const ENTER_ALPM: &[ActionSpec] = &[ActionSpec::voltage("vci", 2_800_000)];
const EXIT_ALPM: &[ActionSpec] = &[ActionSpec::voltage("vci", 3_000_000)];
const ALPM_DELAY: &[ActionSpec] = &[ActionSpec::delay_ms(34)];
const RESET_LP11: &[ActionSpec] = &[
    ActionSpec::pin_off("reset"),
    ActionSpec::delay_us(500),
    ActionSpec::pin_on("reset"),
];

pub const SEQUENCES: &[SequenceSpec] = &[
    SequenceSpec::new(OWNER, names::POWER_ON, POWER_ON),
    SequenceSpec::new(OWNER, names::POWER_OFF, POWER_OFF),
    SequenceSpec::new(OWNER, names::ENTER_ALPM, ENTER_ALPM),
    SequenceSpec::new(OWNER, names::EXIT_ALPM, EXIT_ALPM),
    SequenceSpec::new(OWNER, names::ALPM_DELAY, ALPM_DELAY),
    SequenceSpec::new(OWNER, names::RESET_LP11, RESET_LP11),
];

pub const MODES: &[DisplayMode] = &[
    DisplayMode::new(0, 1080, 2400, 60),
    DisplayMode::new(1, 1080, 2400, 120),
    DisplayMode::new(2, 720, 1600, 120),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RailCall {
    Enable(usize),
    Disable(usize),
    Voltage(usize, u32),
    CurrentLimit(usize, u32),
}

/// Shared fake hardware: pin levels, rails, command link and time.
#[derive(Default)]
pub struct Bench {
    levels: RefCell<HashMap<u32, PinLevel>>,
    pin_writes: RefCell<Vec<(u32, PinLevel)>>,
    irq_writes: Cell<u32>,
    rail_calls: RefCell<Vec<RailCall>>,
    failing_rail: Cell<Option<usize>>,
    commands: RefCell<Vec<CommandTable>>,
    init_failures: Cell<u32>,
    activity: Cell<Option<u32>>,
    panel_id: Cell<Option<[u8; 3]>>,
    now_us: Cell<u64>,
    sleeps: Cell<u32>,
}

impl Bench {
    /// Connected panel with every monitored signal nominal.
    pub fn healthy() -> Rc<Self> {
        let bench = Rc::new(Self::default());
        bench.panel_id.set(Some([0x81, 0x12, 0x40]));
        for pin in [PinId::DispDet, PinId::Pcd, PinId::ErrFg, PinId::ConnDet] {
            bench.set(pin, PinState::Ok);
        }
        bench
    }

    pub fn spec(pin: PinId) -> PinSpec {
        *PINS
            .iter()
            .find(|spec| spec.name == pin.name())
            .expect("pin is part of the bench table")
    }

    /// Drives an input so that it reads as `state` after polarity correction.
    pub fn set(&self, pin: PinId, state: PinState) {
        let spec = Self::spec(pin);
        let high = state.is_ok() ^ spec.active_low;
        self.set_level(pin, PinLevel::from_bool(high));
    }

    pub fn set_level(&self, pin: PinId, level: PinLevel) {
        self.levels
            .borrow_mut()
            .insert(Self::spec(pin).number, level);
    }

    pub fn level(&self, pin: PinId) -> PinLevel {
        self.levels
            .borrow()
            .get(&Self::spec(pin).number)
            .copied()
            .unwrap_or(PinLevel::Low)
    }

    /// Every call on rail `index` fails with a bus error from now on.
    pub fn fail_rail(&self, index: usize) {
        self.failing_rail.set(Some(index));
    }

    pub fn heal_rails(&self) {
        self.failing_rail.set(None);
    }

    pub fn fail_init(&self, times: u32) {
        self.init_failures.set(times);
    }

    pub fn set_activity(&self, value: Option<u32>) {
        self.activity.set(value);
    }

    pub fn set_panel_id(&self, id: Option<[u8; 3]>) {
        self.panel_id.set(id);
    }

    pub fn pin_writes(&self) -> Vec<(u32, PinLevel)> {
        self.pin_writes.borrow().clone()
    }

    pub fn rail_calls(&self) -> Vec<RailCall> {
        self.rail_calls.borrow().clone()
    }

    /// Pin writes plus rail calls.
    pub fn hardware_writes(&self) -> usize {
        self.pin_writes.borrow().len() + self.rail_calls.borrow().len()
    }

    pub fn irq_writes(&self) -> u32 {
        self.irq_writes.get()
    }

    pub fn commands(&self) -> Vec<CommandTable> {
        self.commands.borrow().clone()
    }

    pub fn sent(&self, table: CommandTable) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|sent| **sent == table)
            .count()
    }

    pub fn clear_log(&self) {
        self.pin_writes.borrow_mut().clear();
        self.rail_calls.borrow_mut().clear();
        self.commands.borrow_mut().clear();
    }

    pub fn now(&self) -> Duration {
        Duration::from_micros(self.now_us.get())
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }

    pub fn advance(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).expect("duration fits");
        self.now_us.set(self.now_us.get() + micros);
    }
}

pub struct BenchPins(pub Rc<Bench>);

impl PinDriver for BenchPins {
    fn read(&mut self, number: u32) -> Result<PinLevel, HardwareError> {
        Ok(self
            .0
            .levels
            .borrow()
            .get(&number)
            .copied()
            .unwrap_or(PinLevel::Low))
    }

    fn write(&mut self, number: u32, level: PinLevel) -> Result<(), HardwareError> {
        self.0.pin_writes.borrow_mut().push((number, level));
        self.0.levels.borrow_mut().insert(number, level);
        Ok(())
    }

    fn set_irq_enabled(&mut self, _irq: u32, _enabled: bool) -> Result<(), HardwareError> {
        self.0.irq_writes.set(self.0.irq_writes.get() + 1);
        Ok(())
    }

    fn clear_pending(&mut self, _irq: u32) -> Result<(), HardwareError> {
        Ok(())
    }
}

pub struct BenchRails(pub Rc<Bench>);

impl BenchRails {
    fn log(&self, call: RailCall) -> Result<(), HardwareError> {
        let index = match call {
            RailCall::Enable(index)
            | RailCall::Disable(index)
            | RailCall::Voltage(index, _)
            | RailCall::CurrentLimit(index, _) => index,
        };
        if self.0.failing_rail.get() == Some(index) {
            return Err(HardwareError::Bus);
        }
        self.0.rail_calls.borrow_mut().push(call);
        Ok(())
    }
}

impl RegulatorDriver for BenchRails {
    fn enable(&mut self, id: RegulatorId) -> Result<(), HardwareError> {
        self.log(RailCall::Enable(id.index()))
    }

    fn disable(&mut self, id: RegulatorId) -> Result<(), HardwareError> {
        self.log(RailCall::Disable(id.index()))
    }

    fn set_voltage(&mut self, id: RegulatorId, microvolts: u32) -> Result<(), HardwareError> {
        self.log(RailCall::Voltage(id.index(), microvolts))
    }

    fn set_current_limit(&mut self, id: RegulatorId, microamps: u32) -> Result<(), HardwareError> {
        self.log(RailCall::CurrentLimit(id.index(), microamps))
    }
}

pub struct BenchLink(pub Rc<Bench>);

impl CommandLink for BenchLink {
    fn has_table(&self, table: CommandTable) -> bool {
        !matches!(table, CommandTable::InterfaceInit | CommandTable::Dump)
    }

    fn send(&mut self, table: CommandTable) -> impl Future<Output = Result<(), HardwareError>> {
        self.0.commands.borrow_mut().push(table);
        let failures = self.0.init_failures.get();
        let result = if table == CommandTable::Init && failures > 0 {
            self.0.init_failures.set(failures - 1);
            Err(HardwareError::Bus)
        } else {
            Ok(())
        };
        ready(result)
    }

    fn read_id(&mut self) -> impl Future<Output = Result<[u8; 3], HardwareError>> {
        ready(self.0.panel_id.get().ok_or(HardwareError::Bus))
    }

    fn read_activity(&mut self) -> impl Future<Output = Result<u32, HardwareError>> {
        ready(self.0.activity.get().ok_or(HardwareError::Unsupported))
    }
}

/// Virtual time: every wait advances the bench clock immediately.
pub struct BenchClock(pub Rc<Bench>);

impl PanelClock for BenchClock {
    fn now(&self) -> Duration {
        self.0.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.0.sleeps.set(self.0.sleeps.get() + 1);
        self.0.advance(duration);
    }

    async fn settle(&self, duration: Duration) {
        self.0.advance(duration);
    }
}

pub type Registry<'a> = PanelRegistry<'a, NoopRawMutex>;

pub type BenchDevice<'a> =
    PanelDevice<'a, NoopRawMutex, BenchPins, BenchRails, BenchClock, OledFamily<BenchLink>>;

pub fn config() -> PanelConfig {
    PanelConfig::new(OWNER)
}

/// Builds a device on `bench` with the full sequence table.
pub fn device<'a>(bench: &Rc<Bench>, registry: &'a Registry<'a>) -> BenchDevice<'a> {
    device_with(bench, registry, config(), PINS, SEQUENCES)
}

pub fn device_with<'a>(
    bench: &Rc<Bench>,
    registry: &'a Registry<'a>,
    config: PanelConfig,
    pins: &[PinSpec],
    sequences: &[SequenceSpec],
) -> BenchDevice<'a> {
    let (pins, power) = power_control(bench, pins, sequences);
    PanelDevice::new(
        config,
        registry,
        pins,
        power,
        BenchClock(Rc::clone(bench)),
        OledFamily::new(BenchLink(Rc::clone(bench)), MODES),
    )
}

/// Pin bank and power engine on `bench`, without a device around them.
pub fn power_control(
    bench: &Rc<Bench>,
    pins: &[PinSpec],
    sequences: &[SequenceSpec],
) -> (PinBank<BenchPins>, PowerControl<BenchRails>) {
    let pins = PinBank::from_specs(BenchPins(Rc::clone(bench)), pins).expect("pin table");
    let rails =
        RegulatorBank::from_names(BenchRails(Rc::clone(bench)), RAILS).expect("rail table");
    let power = PowerControl::from_specs(sequences, &pins, rails).expect("sequence table");
    (pins, power)
}

pub fn run<T>(future: impl Future<Output = T>) -> T {
    embassy_futures::block_on(future)
}
