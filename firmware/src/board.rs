#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Panel wiring on the controller board.
//!
//! GPIO numbers are `port * 16 + pin`, so PB3 is 19. Every monitored input
//! sits on its own EXTI line.

use panel_core::config::{ErrFlagPolicy, PanelConfig};
use panel_core::family::{CommandTable, DisplayMode};
use panel_core::pins::{IrqTrigger, PinId, PinSpec};
use panel_core::power::{ActionSpec, SequenceSpec, names};

/// Sequence owner and registry name of the only panel.
pub const PANEL: &str = "panel0";

/// PA8.
pub const RESET: u32 = 8;
/// PB3, high while the panel supply is up.
pub const DISP_DET: u32 = 19;
/// PB4, pulled low by the crack-detect loop.
pub const PCD: u32 = 20;
/// PB5, low when the panel flags a command error.
pub const ERR_FG: u32 = 21;
/// PB6, grounded by the flex cable when it is seated.
pub const CONN_DET: u32 = 22;

pub const PINS: &[PinSpec] = &[
    PinSpec::output("reset", RESET, false),
    PinSpec::input("disp-det", DISP_DET, false).with_irq(IrqTrigger::FallingEdge),
    PinSpec::input("pcd", PCD, false).with_irq(IrqTrigger::FallingEdge),
    PinSpec::input("err-fg", ERR_FG, false).with_irq(IrqTrigger::FallingEdge),
    PinSpec::input("conn-det", CONN_DET, true).with_irq(IrqTrigger::BothEdges),
];

/// Monitored inputs in the order the edge tasks are spawned.
pub const MONITORED: [(PinId, u32); 4] = [
    (PinId::DispDet, DISP_DET),
    (PinId::Pcd, PCD),
    (PinId::ErrFg, ERR_FG),
    (PinId::ConnDet, CONN_DET),
];

/// Load switches, in regulator-id order.
pub const RAILS: &[&str] = &["vci", "vddi"];

const POWER_ON: &[ActionSpec] = &[
    ActionSpec::regulator_on("vddi"),
    ActionSpec::delay_ms(1),
    ActionSpec::regulator_on("vci"),
    ActionSpec::delay_ms(10),
    ActionSpec::pin_on("reset"),
    ActionSpec::delay_ms(5),
    ActionSpec::pin_off("reset"),
    ActionSpec::delay_us(100),
    ActionSpec::pin_on("reset"),
    ActionSpec::delay_ms(30),
];

const POWER_OFF: &[ActionSpec] = &[
    ActionSpec::pin_off("reset"),
    ActionSpec::delay_ms(1),
    ActionSpec::regulator_off("vci"),
    ActionSpec::delay_ms(1),
    ActionSpec::regulator_off("vddi"),
];

const RESET_LP11: &[ActionSpec] = &[
    ActionSpec::pin_off("reset"),
    ActionSpec::delay_us(500),
    ActionSpec::pin_on("reset"),
    ActionSpec::delay_ms(10),
];

const ALPM_DELAY: &[ActionSpec] = &[ActionSpec::delay_ms(34)];

pub const SEQUENCES: &[SequenceSpec] = &[
    SequenceSpec::new(PANEL, names::POWER_ON, POWER_ON),
    SequenceSpec::new(PANEL, names::POWER_OFF, POWER_OFF),
    SequenceSpec::new(PANEL, names::RESET_LP11, RESET_LP11),
    SequenceSpec::new(PANEL, names::ALPM_DELAY, ALPM_DELAY),
];

pub const MODES: &[DisplayMode] = &[
    DisplayMode::new(0, 1080, 2340, 60),
    DisplayMode::new(1, 1080, 2340, 120),
];

/// Command tables as MIPI DCS bytes: `(command, parameters)` pairs.
#[must_use]
pub const fn dcs_table(table: CommandTable) -> &'static [(u8, &'static [u8])] {
    match table {
        CommandTable::Init => &[(0x11, &[]), (0x35, &[0x00]), (0x53, &[0x20])],
        CommandTable::Exit => &[(0x10, &[])],
        CommandTable::DisplayOn => &[(0x29, &[])],
        CommandTable::DisplayOff => &[(0x28, &[])],
        CommandTable::AlpmEnter => &[(0x39, &[])],
        CommandTable::AlpmExit => &[(0x38, &[])],
        CommandTable::DisplayMode(0) => &[(0x2a, &[0x00, 0x00, 0x04, 0x37])],
        CommandTable::DisplayMode(1) => &[(0x2a, &[0x00, 0x00, 0x04, 0x37]), (0x60, &[0x01])],
        CommandTable::InterfaceInit
        | CommandTable::CheckCondition
        | CommandTable::Dump
        | CommandTable::DisplayMode(_) => &[],
    }
}

/// DCS read of `ID1 ID2 ID3`.
pub const READ_ID: u8 = 0x04;
/// DCS read of the display brightness, zero on a black screen.
pub const READ_BRIGHTNESS: u8 = 0x52;

/// Microseconds between synthetic frame-done events.
pub const FRAME_PERIOD_US: u64 = 16_667;

#[must_use]
pub const fn panel_config() -> PanelConfig {
    PanelConfig::new(PANEL)
        .with_err_flag(ErrFlagPolicy {
            recovery: true,
            powerdown: false,
        })
        .with_connector_uevent(true)
}
