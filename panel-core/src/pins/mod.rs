//! Pin and interrupt capability layer.
//!
//! Every panel signal (reset line, display-detect, crack-detect, connector,
//! command-error flag, tearing effect) is described once by a
//! [`PinDescriptor`] and then driven exclusively through [`PinBank`]. The
//! bank owns the platform [`PinDriver`] and is the only place that flips the
//! interrupt `enabled`/`registered` flags.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::clock::{self, PanelClock};
use crate::error::{HardwareError, PanelError};

/// Maximum number of pins a single panel may describe.
pub const MAX_PINS: usize = 8;

/// Pin numbers at or above this value are rejected as invalid.
pub const PIN_NUMBER_LIMIT: u32 = 1024;

/// Logical panel signals understood by the core.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinId {
    Reset,
    DispDet,
    Pcd,
    ErrFg,
    ConnDet,
    DispTe,
}

impl PinId {
    /// Every signal in declaration order.
    pub const ALL: [PinId; 6] = [
        PinId::Reset,
        PinId::DispDet,
        PinId::Pcd,
        PinId::ErrFg,
        PinId::ConnDet,
        PinId::DispTe,
    ];

    /// Canonical configuration name of the signal.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PinId::Reset => "reset",
            PinId::DispDet => "disp-det",
            PinId::Pcd => "pcd",
            PinId::ErrFg => "err-fg",
            PinId::ConnDet => "conn-det",
            PinId::DispTe => "disp-te",
        }
    }

    /// Resolves a configuration name to a signal.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Electrical level of a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    #[must_use]
    pub const fn from_bool(high: bool) -> Self {
        if high { PinLevel::High } else { PinLevel::Low }
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, PinLevel::High)
    }
}

/// Polarity-corrected reading: `Ok` always means the hardware is nominal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinState {
    Ok,
    Nok,
}

impl PinState {
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, PinState::Ok)
    }

    /// Applies `level XOR active_low`.
    #[must_use]
    pub const fn from_level(level: PinLevel, active_low: bool) -> Self {
        if level.is_high() ^ active_low {
            PinState::Ok
        } else {
            PinState::Nok
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PinState::Ok => "ok",
            PinState::Nok => "nok",
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqTrigger {
    RisingEdge,
    FallingEdge,
    BothEdges,
    LevelHigh,
    LevelLow,
}

/// Outcome of an enable/disable request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqChange {
    /// The flag flipped and the driver was updated.
    Changed,
    /// The interrupt was already in the requested state; nothing was done.
    Unchanged,
}

/// Interrupt attached to a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IrqDescriptor {
    number: u32,
    trigger: IrqTrigger,
    enabled: bool,
    registered: bool,
    pending: bool,
}

impl IrqDescriptor {
    #[must_use]
    pub const fn new(number: u32, trigger: IrqTrigger) -> Self {
        Self {
            number,
            trigger,
            enabled: false,
            registered: false,
            pending: false,
        }
    }

    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub const fn trigger(&self) -> IrqTrigger {
        self.trigger
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.registered
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Construction input for a pin, as read from board configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinSpec {
    pub name: &'static str,
    pub number: u32,
    pub active_low: bool,
    pub direction: PinDirection,
    pub irq: Option<IrqTrigger>,
}

impl PinSpec {
    #[must_use]
    pub const fn input(name: &'static str, number: u32, active_low: bool) -> Self {
        Self {
            name,
            number,
            active_low,
            direction: PinDirection::Input,
            irq: None,
        }
    }

    #[must_use]
    pub const fn output(name: &'static str, number: u32, active_low: bool) -> Self {
        Self {
            name,
            number,
            active_low,
            direction: PinDirection::Output,
            irq: None,
        }
    }

    /// Attaches an interrupt on the pin's own line.
    #[must_use]
    pub const fn with_irq(mut self, trigger: IrqTrigger) -> Self {
        self.irq = Some(trigger);
        self
    }
}

/// Immutable description of a panel pin plus its interrupt flags.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinDescriptor {
    id: PinId,
    name: &'static str,
    number: u32,
    active_low: bool,
    direction: PinDirection,
    irq: Option<IrqDescriptor>,
}

impl PinDescriptor {
    /// Resolves a [`PinSpec`] against the known signal names.
    ///
    /// # Errors
    ///
    /// Returns [`PanelError::InvalidArgument`] for unknown names.
    pub fn from_spec(spec: &PinSpec) -> Result<Self, PanelError> {
        let id = PinId::from_name(spec.name).ok_or(PanelError::InvalidArgument)?;
        Ok(Self {
            id,
            name: spec.name,
            number: spec.number,
            active_low: spec.active_low,
            direction: spec.direction,
            irq: spec
                .irq
                .map(|trigger| IrqDescriptor::new(spec.number, trigger)),
        })
    }

    /// Name non-empty and pin number within range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.number < PIN_NUMBER_LIMIT
    }

    #[must_use]
    pub const fn id(&self) -> PinId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub const fn active_low(&self) -> bool {
        self.active_low
    }

    #[must_use]
    pub const fn direction(&self) -> PinDirection {
        self.direction
    }

    #[must_use]
    pub const fn irq(&self) -> Option<&IrqDescriptor> {
        self.irq.as_ref()
    }
}

/// Platform GPIO access for panel pins.
pub trait PinDriver {
    /// Samples the electrical level of a pin.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the pin cannot be read.
    fn read(&mut self, number: u32) -> Result<PinLevel, HardwareError>;

    /// Drives an output pin.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the pin cannot be driven.
    fn write(&mut self, number: u32, level: PinLevel) -> Result<(), HardwareError>;

    /// Unmasks or masks the interrupt line.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the interrupt controller rejects it.
    fn set_irq_enabled(&mut self, irq: u32, enabled: bool) -> Result<(), HardwareError>;

    /// Clears a latched interrupt.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the interrupt controller rejects it.
    fn clear_pending(&mut self, irq: u32) -> Result<(), HardwareError>;
}

/// Owns the pin table and the driver; all pin operations go through here.
pub struct PinBank<P> {
    pins: Vec<PinDescriptor, MAX_PINS>,
    driver: P,
}

impl<P: PinDriver> PinBank<P> {
    #[must_use]
    pub const fn new(driver: P) -> Self {
        Self {
            pins: Vec::new(),
            driver,
        }
    }

    /// Builds a bank from configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`PinBank::add`] failures.
    pub fn from_specs(driver: P, specs: &[PinSpec]) -> Result<Self, PanelError> {
        let mut bank = Self::new(driver);
        for spec in specs {
            bank.add(spec)?;
        }
        Ok(bank)
    }

    /// Adds a pin described by `spec`.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] for unknown, invalid, or duplicate
    /// pins; [`PanelError::RegistryFull`] when the table is full.
    pub fn add(&mut self, spec: &PinSpec) -> Result<(), PanelError> {
        let descriptor = PinDescriptor::from_spec(spec)?;
        if !descriptor.is_valid() || self.contains(descriptor.id) {
            return Err(PanelError::InvalidArgument);
        }
        self.pins
            .push(descriptor)
            .map_err(|_| PanelError::RegistryFull)
    }

    /// Returns `true` when a valid descriptor exists for `id`.
    #[must_use]
    pub fn contains(&self, id: PinId) -> bool {
        self.descriptor(id).is_some()
    }

    #[must_use]
    pub fn descriptor(&self, id: PinId) -> Option<&PinDescriptor> {
        self.pins
            .iter()
            .find(|pin| pin.id == id && pin.is_valid())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PinDescriptor> {
        self.pins.iter()
    }

    #[must_use]
    pub fn driver(&self) -> &P {
        &self.driver
    }

    fn lookup(&self, id: PinId) -> Result<PinDescriptor, PanelError> {
        self.descriptor(id).copied().ok_or(PanelError::InvalidArgument)
    }

    fn irq_mut(&mut self, id: PinId) -> Result<&mut IrqDescriptor, PanelError> {
        self.pins
            .iter_mut()
            .find(|pin| pin.id == id && pin.is_valid())
            .ok_or(PanelError::InvalidArgument)?
            .irq
            .as_mut()
            .ok_or(PanelError::InvalidArgument)
    }

    /// Reads the raw level of `id`.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] for missing pins, driver failures otherwise.
    pub fn read_level(&mut self, id: PinId) -> Result<PinLevel, PanelError> {
        let pin = self.lookup(id)?;
        Ok(self.driver.read(pin.number)?)
    }

    /// Drives the raw level of `id`.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] for missing pins, driver failures otherwise.
    pub fn write_level(&mut self, id: PinId, level: PinLevel) -> Result<(), PanelError> {
        let pin = self.lookup(id)?;
        Ok(self.driver.write(pin.number, level)?)
    }

    /// Polarity-corrected state of `id`.
    ///
    /// # Errors
    ///
    /// Same as [`PinBank::read_level`].
    pub fn state(&mut self, id: PinId) -> Result<PinState, PanelError> {
        let pin = self.lookup(id)?;
        let level = self.driver.read(pin.number)?;
        Ok(PinState::from_level(level, pin.active_low))
    }

    /// State of `id`, or `None` when the pin is not wired on this board.
    ///
    /// # Errors
    ///
    /// Driver failures on a wired pin.
    pub fn optional_state(&mut self, id: PinId) -> Result<Option<PinState>, PanelError> {
        if self.contains(id) {
            self.state(id).map(Some)
        } else {
            Ok(None)
        }
    }

    #[must_use]
    pub fn is_irq_valid(&self, id: PinId) -> bool {
        self.descriptor(id).is_some_and(|pin| pin.irq.is_some())
    }

    #[must_use]
    pub fn is_irq_enabled(&self, id: PinId) -> bool {
        self.descriptor(id)
            .and_then(PinDescriptor::irq)
            .is_some_and(IrqDescriptor::is_enabled)
    }

    #[must_use]
    pub fn is_irq_registered(&self, id: PinId) -> bool {
        self.descriptor(id)
            .and_then(PinDescriptor::irq)
            .is_some_and(IrqDescriptor::is_registered)
    }

    /// Marks the interrupt as having a handler attached.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] when the pin has no interrupt.
    pub fn register_irq(&mut self, id: PinId) -> Result<(), PanelError> {
        self.irq_mut(id)?.registered = true;
        Ok(())
    }

    /// Disables the interrupt and detaches its handler.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] when the pin has no interrupt.
    pub fn unregister_irq(&mut self, id: PinId) -> Result<(), PanelError> {
        self.disable_irq(id)?;
        self.irq_mut(id)?.registered = false;
        Ok(())
    }

    /// Clears any latched edge, then unmasks the interrupt.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] when the pin has no interrupt,
    /// [`PanelError::Unsupported`] when no handler is registered, driver
    /// failures otherwise.
    pub fn enable_irq(&mut self, id: PinId) -> Result<IrqChange, PanelError> {
        let irq = *self.irq_mut(id)?;
        if !irq.registered {
            return Err(PanelError::Unsupported);
        }
        if irq.enabled {
            panel_warn!("{} irq already enabled", id);
            return Ok(IrqChange::Unchanged);
        }

        self.driver.clear_pending(irq.number)?;
        self.driver.set_irq_enabled(irq.number, true)?;
        let irq = self.irq_mut(id)?;
        irq.pending = false;
        irq.enabled = true;
        Ok(IrqChange::Changed)
    }

    /// Masks the interrupt.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] when the pin has no interrupt, driver
    /// failures otherwise.
    pub fn disable_irq(&mut self, id: PinId) -> Result<IrqChange, PanelError> {
        let irq = *self.irq_mut(id)?;
        if !irq.enabled {
            if irq.registered {
                panel_warn!("{} irq already disabled", id);
            }
            return Ok(IrqChange::Unchanged);
        }

        self.driver.set_irq_enabled(irq.number, false)?;
        self.irq_mut(id)?.enabled = false;
        Ok(IrqChange::Changed)
    }

    /// Drops a latched edge without touching the enable state.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] when the pin has no interrupt, driver
    /// failures otherwise.
    pub fn clear_pending_irq(&mut self, id: PinId) -> Result<(), PanelError> {
        let number = self.irq_mut(id)?.number;
        self.driver.clear_pending(number)?;
        self.irq_mut(id)?.pending = false;
        Ok(())
    }

    /// Records an edge reported by the platform.
    ///
    /// Returns `true` when the interrupt is enabled and the edge should be
    /// dispatched; masked edges are only latched as pending.
    pub fn latch_edge(&mut self, id: PinId) -> bool {
        match self.irq_mut(id) {
            Ok(irq) if irq.enabled => true,
            Ok(irq) => {
                irq.pending = true;
                false
            }
            Err(_) => false,
        }
    }

    /// Masks every enabled interrupt, returning the set that was masked.
    pub fn disable_all_irqs(&mut self) -> IrqSet {
        let mut masked = IrqSet::EMPTY;
        for id in PinId::ALL {
            if self.is_irq_enabled(id) && self.disable_irq(id).is_ok() {
                masked.insert(id);
            }
        }
        masked
    }
}

/// Compact set of pins, used to report which interrupts were touched.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IrqSet(u8);

impl IrqSet {
    pub const EMPTY: IrqSet = IrqSet(0);

    pub fn insert(&mut self, id: PinId) {
        self.0 |= id.bit();
    }

    #[must_use]
    pub const fn contains(self, id: PinId) -> bool {
        self.0 & id.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Samples until `sample` reports the expected condition.
///
/// Makes `attempts` tries spaced by `interval`.
///
/// # Errors
///
/// [`PanelError::Timeout`] once the attempts run out; sampling errors abort
/// the poll immediately.
pub async fn poll<C, F>(
    clock: &C,
    attempts: u8,
    interval: Duration,
    mut sample: F,
) -> Result<(), PanelError>
where
    C: PanelClock,
    F: FnMut() -> Result<bool, PanelError>,
{
    for attempt in 0..attempts {
        if sample()? {
            return Ok(());
        }
        if attempt + 1 < attempts {
            clock::delay(clock, interval).await;
        }
    }
    Err(PanelError::Timeout)
}
