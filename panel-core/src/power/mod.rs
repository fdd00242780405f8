//! Named power-control sequencing engine.
//!
//! A sequence is an ordered list of [`PowerAction`]s keyed by
//! `(owner, name)`. Sequences are resolved once from board configuration and
//! stay read-only afterwards. Execution walks the list strictly in order and
//! stops at the first failing action. Looking up a sequence that does not
//! exist yields [`PanelError::NotFound`], which callers treat as "nothing to
//! do" for optional steps.

use core::time::Duration;

use heapless::Vec;

use crate::clock::{self, PanelClock};
use crate::error::{HardwareError, PanelError};
use crate::pins::{PinBank, PinDriver, PinId, PinLevel};

pub mod regulator;

pub use regulator::{FixedRegulators, RegulatorBank, RegulatorDriver, RegulatorId};

/// Maximum number of sequences per device.
pub const MAX_SEQUENCES: usize = 24;
/// Maximum number of actions inside one sequence.
pub const MAX_ACTIONS: usize = 16;

/// Well-known sequence names looked up by the state machine.
pub mod names {
    pub const POWER_INIT: &str = "panel_power_init";
    pub const POWER_ON: &str = "panel_power_on";
    pub const POWER_OFF: &str = "panel_power_off";
    pub const RESET_LP11: &str = "panel_reset_lp11";
    pub const ENTER_ALPM: &str = "panel_power_enter_alpm";
    pub const EXIT_ALPM_PRE: &str = "panel_power_exit_alpm_pre";
    pub const EXIT_ALPM: &str = "panel_power_exit_alpm";
    pub const FD_ENABLE: &str = "panel_fd_enable";
    pub const FD_DISABLE: &str = "panel_fd_disable";
    /// Single `Delay` holding the minimum panel-on time before entering LPM.
    pub const ALPM_DELAY: &str = "panel_alpm_delay";
}

/// Resolved hardware action.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerAction {
    Delay { micros: u32 },
    RegulatorEnable(RegulatorId),
    RegulatorDisable(RegulatorId),
    RegulatorSetVoltage { regulator: RegulatorId, microvolts: u32 },
    RegulatorSetCurrentLimit { regulator: RegulatorId, microamps: u32 },
    PinEnable(PinId),
    PinDisable(PinId),
}

/// Action type tag used by configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionKind {
    Delay,
    RegulatorEnable,
    RegulatorDisable,
    RegulatorSetVoltage,
    RegulatorSetCurrentLimit,
    PinEnable,
    PinDisable,
}

/// Unresolved `{actionType, targetRef, value}` triple.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub target: &'static str,
    pub value: u32,
}

impl ActionSpec {
    #[must_use]
    pub const fn new(kind: ActionKind, target: &'static str, value: u32) -> Self {
        Self {
            kind,
            target,
            value,
        }
    }

    #[must_use]
    pub const fn delay_us(micros: u32) -> Self {
        Self::new(ActionKind::Delay, "", micros)
    }

    #[must_use]
    pub const fn delay_ms(millis: u32) -> Self {
        Self::delay_us(millis.saturating_mul(1_000))
    }

    #[must_use]
    pub const fn regulator_on(target: &'static str) -> Self {
        Self::new(ActionKind::RegulatorEnable, target, 0)
    }

    #[must_use]
    pub const fn regulator_off(target: &'static str) -> Self {
        Self::new(ActionKind::RegulatorDisable, target, 0)
    }

    #[must_use]
    pub const fn voltage(target: &'static str, microvolts: u32) -> Self {
        Self::new(ActionKind::RegulatorSetVoltage, target, microvolts)
    }

    #[must_use]
    pub const fn current_limit(target: &'static str, microamps: u32) -> Self {
        Self::new(ActionKind::RegulatorSetCurrentLimit, target, microamps)
    }

    #[must_use]
    pub const fn pin_on(target: &'static str) -> Self {
        Self::new(ActionKind::PinEnable, target, 0)
    }

    #[must_use]
    pub const fn pin_off(target: &'static str) -> Self {
        Self::new(ActionKind::PinDisable, target, 0)
    }

    fn resolve<P: PinDriver, R: RegulatorDriver>(
        &self,
        pins: &PinBank<P>,
        regulators: &RegulatorBank<R>,
    ) -> Result<PowerAction, PanelError> {
        let regulator = || regulators.find(self.target).ok_or(PanelError::InvalidArgument);
        let pin = || {
            PinId::from_name(self.target)
                .filter(|id| pins.contains(*id))
                .ok_or(PanelError::InvalidArgument)
        };

        Ok(match self.kind {
            ActionKind::Delay => PowerAction::Delay { micros: self.value },
            ActionKind::RegulatorEnable => PowerAction::RegulatorEnable(regulator()?),
            ActionKind::RegulatorDisable => PowerAction::RegulatorDisable(regulator()?),
            ActionKind::RegulatorSetVoltage => PowerAction::RegulatorSetVoltage {
                regulator: regulator()?,
                microvolts: self.value,
            },
            ActionKind::RegulatorSetCurrentLimit => PowerAction::RegulatorSetCurrentLimit {
                regulator: regulator()?,
                microamps: self.value,
            },
            ActionKind::PinEnable => PowerAction::PinEnable(pin()?),
            ActionKind::PinDisable => PowerAction::PinDisable(pin()?),
        })
    }
}

/// Unresolved sequence as read from configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceSpec {
    pub owner: &'static str,
    pub name: &'static str,
    pub actions: &'static [ActionSpec],
}

impl SequenceSpec {
    #[must_use]
    pub const fn new(
        owner: &'static str,
        name: &'static str,
        actions: &'static [ActionSpec],
    ) -> Self {
        Self {
            owner,
            name,
            actions,
        }
    }
}

/// Resolved, immutable sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PowerSequence {
    owner: &'static str,
    name: &'static str,
    actions: Vec<PowerAction, MAX_ACTIONS>,
}

impl PowerSequence {
    #[must_use]
    pub const fn owner(&self) -> &'static str {
        self.owner
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn actions(&self) -> &[PowerAction] {
        &self.actions
    }

    fn matches(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && self.name == name
    }

    /// Runs every action in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// [`PanelError::SequenceActionFailed`] naming the failing action.
    pub async fn run<R, C, F>(
        &self,
        regulators: &mut RegulatorBank<R>,
        clock: &C,
        mut drive_pin: F,
    ) -> Result<(), PanelError>
    where
        R: RegulatorDriver,
        C: PanelClock,
        F: FnMut(PinId, PinLevel) -> Result<(), PanelError>,
    {
        for (index, action) in self.actions.iter().enumerate() {
            let result = match *action {
                PowerAction::Delay { micros } => {
                    clock::delay(clock, Duration::from_micros(u64::from(micros))).await;
                    Ok(())
                }
                PowerAction::RegulatorEnable(id) => regulators.enable(id),
                PowerAction::RegulatorDisable(id) => regulators.disable(id),
                PowerAction::RegulatorSetVoltage {
                    regulator,
                    microvolts,
                } => regulators.set_voltage(regulator, microvolts),
                PowerAction::RegulatorSetCurrentLimit {
                    regulator,
                    microamps,
                } => regulators.set_current_limit(regulator, microamps),
                PowerAction::PinEnable(pin) => {
                    drive_pin(pin, PinLevel::High).map_err(hardware_cause)
                }
                PowerAction::PinDisable(pin) => {
                    drive_pin(pin, PinLevel::Low).map_err(hardware_cause)
                }
            };

            if let Err(cause) = result {
                let index = u8::try_from(index).unwrap_or(u8::MAX);
                panel_error!(
                    "{}:{} failed at action {}: {}",
                    self.owner,
                    self.name,
                    index,
                    cause
                );
                return Err(PanelError::SequenceActionFailed { index, cause });
            }
        }
        Ok(())
    }
}

fn hardware_cause(err: PanelError) -> HardwareError {
    match err {
        PanelError::HardwareFault(cause) | PanelError::SequenceActionFailed { cause, .. } => cause,
        PanelError::Unsupported => HardwareError::Unsupported,
        _ => HardwareError::Rejected,
    }
}

/// Fixed-capacity registry of resolved sequences.
#[derive(Default)]
pub struct SequenceTable {
    sequences: Vec<PowerSequence, MAX_SEQUENCES>,
}

impl SequenceTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sequences: Vec::new(),
        }
    }

    /// Resolves `spec` against the pin and regulator tables and stores it.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] for duplicate keys or dangling
    /// references, [`PanelError::RegistryFull`] when a table overflows.
    pub fn register<P: PinDriver, R: RegulatorDriver>(
        &mut self,
        spec: &SequenceSpec,
        pins: &PinBank<P>,
        regulators: &RegulatorBank<R>,
    ) -> Result<(), PanelError> {
        if spec.owner.is_empty() || spec.name.is_empty() || self.exists(spec.owner, spec.name) {
            return Err(PanelError::InvalidArgument);
        }

        let mut actions = Vec::new();
        for action in spec.actions {
            actions
                .push(action.resolve(pins, regulators)?)
                .map_err(|_| PanelError::RegistryFull)?;
        }

        self.sequences
            .push(PowerSequence {
                owner: spec.owner,
                name: spec.name,
                actions,
            })
            .map_err(|_| PanelError::RegistryFull)
    }

    /// Looks up a sequence by key.
    ///
    /// # Errors
    ///
    /// [`PanelError::NotFound`] when no sequence matches.
    pub fn find(&self, owner: &str, name: &str) -> Result<&PowerSequence, PanelError> {
        self.sequences
            .iter()
            .find(|sequence| sequence.matches(owner, name))
            .ok_or(PanelError::NotFound)
    }

    #[must_use]
    pub fn exists(&self, owner: &str, name: &str) -> bool {
        self.find(owner, name).is_ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// Sequence table plus the rails it drives.
pub struct PowerControl<R> {
    sequences: SequenceTable,
    regulators: RegulatorBank<R>,
}

impl<R: RegulatorDriver> PowerControl<R> {
    #[must_use]
    pub const fn new(sequences: SequenceTable, regulators: RegulatorBank<R>) -> Self {
        Self {
            sequences,
            regulators,
        }
    }

    /// Resolves every spec against `pins` and `regulators`.
    ///
    /// # Errors
    ///
    /// Propagates [`SequenceTable::register`] failures.
    pub fn from_specs<P: PinDriver>(
        specs: &[SequenceSpec],
        pins: &PinBank<P>,
        regulators: RegulatorBank<R>,
    ) -> Result<Self, PanelError> {
        let mut sequences = SequenceTable::new();
        for spec in specs {
            sequences.register(spec, pins, &regulators)?;
        }
        Ok(Self::new(sequences, regulators))
    }

    #[must_use]
    pub fn sequences(&self) -> &SequenceTable {
        &self.sequences
    }

    #[must_use]
    pub fn regulators(&self) -> &RegulatorBank<R> {
        &self.regulators
    }

    /// # Errors
    ///
    /// [`PanelError::NotFound`] when no sequence matches.
    pub fn find(&self, owner: &str, name: &str) -> Result<&PowerSequence, PanelError> {
        self.sequences.find(owner, name)
    }

    #[must_use]
    pub fn exists(&self, owner: &str, name: &str) -> bool {
        self.sequences.exists(owner, name)
    }

    /// Probe-time rail setup.
    ///
    /// # Errors
    ///
    /// The last rail failure, as [`PanelError::HardwareFault`].
    pub fn init_regulators(&mut self) -> Result<(), PanelError> {
        Ok(self.regulators.init_all()?)
    }

    /// Executes `(owner, name)`; a bypassed panel is never touched.
    ///
    /// # Errors
    ///
    /// [`PanelError::NotFound`] for unknown sequences and
    /// [`PanelError::SequenceActionFailed`] for the first failing action.
    pub async fn execute<C, F>(
        &mut self,
        owner: &str,
        name: &str,
        bypass: bool,
        clock: &C,
        drive_pin: F,
    ) -> Result<(), PanelError>
    where
        C: PanelClock,
        F: FnMut(PinId, PinLevel) -> Result<(), PanelError>,
    {
        if bypass {
            panel_debug!("{}:{} skipped, panel bypassed", owner, name);
            return Ok(());
        }

        let sequence = self.sequences.find(owner, name)?;
        panel_debug!("{}:{} start", owner, name);
        sequence.run(&mut self.regulators, clock, drive_pin).await?;
        panel_debug!("{}:{} done", owner, name);
        Ok(())
    }

    /// Duration of the leading delay of `(owner, name)`, if any.
    #[must_use]
    pub fn leading_delay(&self, owner: &str, name: &str) -> Option<Duration> {
        match self.sequences.find(owner, name).ok()?.actions().first()? {
            PowerAction::Delay { micros } => Some(Duration::from_micros(u64::from(*micros))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::PinSpec;
    use core::cell::Cell;

    struct NullPins;

    impl PinDriver for NullPins {
        fn read(&mut self, _number: u32) -> Result<PinLevel, HardwareError> {
            Ok(PinLevel::Low)
        }
        fn write(&mut self, _number: u32, _level: PinLevel) -> Result<(), HardwareError> {
            Ok(())
        }
        fn set_irq_enabled(&mut self, _irq: u32, _enabled: bool) -> Result<(), HardwareError> {
            Ok(())
        }
        fn clear_pending(&mut self, _irq: u32) -> Result<(), HardwareError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct VirtualClock {
        now_us: Cell<u64>,
    }

    impl PanelClock for VirtualClock {
        fn now(&self) -> Duration {
            Duration::from_micros(self.now_us.get())
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }

        async fn settle(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    impl VirtualClock {
        fn advance(&self, duration: Duration) {
            let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
            self.now_us.set(self.now_us.get() + micros);
        }
    }

    struct FailingRail;

    impl RegulatorDriver for FailingRail {
        fn enable(&mut self, _id: RegulatorId) -> Result<(), HardwareError> {
            Err(HardwareError::Bus)
        }
        fn disable(&mut self, _id: RegulatorId) -> Result<(), HardwareError> {
            Ok(())
        }
        fn set_voltage(&mut self, _id: RegulatorId, _uv: u32) -> Result<(), HardwareError> {
            Ok(())
        }
        fn set_current_limit(&mut self, _id: RegulatorId, _ua: u32) -> Result<(), HardwareError> {
            Ok(())
        }
    }

    const POWER_ON: &[ActionSpec] = &[
        ActionSpec::voltage("vci", 3_000_000),
        ActionSpec::delay_ms(1),
        ActionSpec::regulator_on("vci"),
        ActionSpec::delay_ms(25),
        ActionSpec::pin_on("reset"),
    ];

    fn pins() -> PinBank<NullPins> {
        PinBank::from_specs(NullPins, &[PinSpec::output("reset", 4, false)]).expect("pins")
    }

    #[test]
    fn lookups_distinguish_owner_and_name() {
        let pins = pins();
        let control = PowerControl::from_specs(
            &[SequenceSpec::new("panel0", names::POWER_ON, POWER_ON)],
            &pins,
            RegulatorBank::from_names(FixedRegulators, &["vci"]).expect("rails"),
        )
        .expect("sequences");

        assert!(control.exists("panel0", names::POWER_ON));
        assert_eq!(
            control.find("panel1", names::POWER_ON).map(PowerSequence::name),
            Err(PanelError::NotFound)
        );
        assert_eq!(
            control.find("panel0", names::POWER_OFF).map(PowerSequence::name),
            Err(PanelError::NotFound)
        );
    }

    #[test]
    fn dangling_references_are_rejected_at_registration() {
        let pins = pins();
        let regulators = RegulatorBank::from_names(FixedRegulators, &["vci"]).expect("rails");
        let mut table = SequenceTable::new();

        const BAD_PIN: &[ActionSpec] = &[ActionSpec::pin_on("pcd")];
        const BAD_RAIL: &[ActionSpec] = &[ActionSpec::regulator_on("vdd")];

        assert_eq!(
            table.register(&SequenceSpec::new("p", "a", BAD_PIN), &pins, &regulators),
            Err(PanelError::InvalidArgument)
        );
        assert_eq!(
            table.register(&SequenceSpec::new("p", "b", BAD_RAIL), &pins, &regulators),
            Err(PanelError::InvalidArgument)
        );
        table
            .register(&SequenceSpec::new("p", "c", POWER_ON), &pins, &regulators)
            .expect("valid");
        assert_eq!(
            table.register(&SequenceSpec::new("p", "c", POWER_ON), &pins, &regulators),
            Err(PanelError::InvalidArgument)
        );
    }

    #[test]
    fn stops_at_first_failing_action() {
        let pins = pins();
        let mut control = PowerControl::from_specs(
            &[SequenceSpec::new("panel0", names::POWER_ON, POWER_ON)],
            &pins,
            RegulatorBank::from_names(FailingRail, &["vci"]).expect("rails"),
        )
        .expect("sequences");
        let clock = VirtualClock::default();
        let writes = Cell::new(0u8);

        let result = embassy_futures::block_on(control.execute(
            "panel0",
            names::POWER_ON,
            false,
            &clock,
            |_, _| {
                writes.set(writes.get() + 1);
                Ok(())
            },
        ));

        assert_eq!(
            result,
            Err(PanelError::SequenceActionFailed {
                index: 2,
                cause: HardwareError::Bus
            })
        );
        assert_eq!(writes.get(), 0, "actions after the failure must not run");
        assert_eq!(clock.now(), Duration::from_millis(1));
    }

    #[test]
    fn delays_block_for_the_requested_time() {
        const ON_ONLY: &[ActionSpec] = &[
            ActionSpec::delay_ms(1),
            ActionSpec::regulator_on("vci"),
            ActionSpec::delay_ms(25),
            ActionSpec::pin_on("reset"),
        ];
        let pins = pins();
        let mut control = PowerControl::from_specs(
            &[SequenceSpec::new("panel0", names::POWER_ON, ON_ONLY)],
            &pins,
            RegulatorBank::from_names(FixedRegulators, &["vci"]).expect("rails"),
        )
        .expect("sequences");
        let clock = VirtualClock::default();
        let mut driven = None;

        embassy_futures::block_on(control.execute(
            "panel0",
            names::POWER_ON,
            false,
            &clock,
            |pin, level| {
                driven = Some((pin, level));
                Ok(())
            },
        ))
        .expect("sequence runs");

        assert_eq!(clock.now(), Duration::from_millis(26));
        assert_eq!(driven, Some((PinId::Reset, PinLevel::High)));
    }

    #[test]
    fn bypass_skips_lookup_and_hardware() {
        let pins = pins();
        let mut control = PowerControl::from_specs(
            &[SequenceSpec::new("panel0", names::POWER_ON, POWER_ON)],
            &pins,
            RegulatorBank::from_names(FailingRail, &["vci"]).expect("rails"),
        )
        .expect("sequences");
        let clock = VirtualClock::default();

        let result = embassy_futures::block_on(control.execute(
            "panel0",
            names::POWER_ON,
            true,
            &clock,
            |_, _| Err(PanelError::InvalidArgument),
        ));

        assert_eq!(result, Ok(()));
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn leading_delay_reads_first_action() {
        const ALPM_DELAY: &[ActionSpec] = &[ActionSpec::delay_ms(34)];
        let pins = pins();
        let control = PowerControl::from_specs(
            &[SequenceSpec::new("panel0", names::ALPM_DELAY, ALPM_DELAY)],
            &pins,
            RegulatorBank::new(FixedRegulators),
        )
        .expect("sequences");

        assert_eq!(
            control.leading_delay("panel0", names::ALPM_DELAY),
            Some(Duration::from_millis(34))
        );
        assert_eq!(control.leading_delay("panel0", names::POWER_ON), None);
    }
}
