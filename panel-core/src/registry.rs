//! Observer registry and per-device callback slots.
//!
//! The registry replaces process-wide notifier lists: the composition root
//! owns one [`PanelRegistry`] and hands a reference to every device it
//! builds. Observers are invoked outside the registry lock so they may call
//! back into the registry or the device.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

use crate::error::PanelError;
use crate::family::DisplayMode;
use crate::state::{ActiveState, Connection};

/// Observer slots per registry.
pub const MAX_OBSERVERS: usize = 4;
/// Panels a registry can list.
pub const MAX_PANELS: usize = 4;

/// Notices broadcast to observers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelNotice {
    /// Connector-detect changed (or was sampled during power-on).
    Connector(Connection),
    /// Disconnect uevent for user space, when enabled by configuration.
    ConnectorUevent,
    StateChanged {
        from: ActiveState,
        to: ActiveState,
    },
}

/// Receives [`PanelNotice`]s for every panel attached to a registry.
pub trait PanelObserver {
    fn notify(&self, panel: &'static str, notice: PanelNotice);
}

/// Handle returned by [`PanelRegistry::subscribe`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ObserverId(usize);

/// Registry shared by every panel of one display subsystem.
pub struct PanelRegistry<'a, M: RawMutex> {
    observers: BlockingMutex<M, RefCell<[Option<&'a dyn PanelObserver>; MAX_OBSERVERS]>>,
    panels: BlockingMutex<M, RefCell<Vec<&'static str, MAX_PANELS>>>,
}

impl<'a, M: RawMutex> PanelRegistry<'a, M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observers: BlockingMutex::new(RefCell::new([None; MAX_OBSERVERS])),
            panels: BlockingMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Adds an observer.
    ///
    /// # Errors
    ///
    /// [`PanelError::RegistryFull`] when every slot is taken.
    pub fn subscribe(&self, observer: &'a dyn PanelObserver) -> Result<ObserverId, PanelError> {
        self.observers.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let index = slots
                .iter()
                .position(Option::is_none)
                .ok_or(PanelError::RegistryFull)?;
            slots[index] = Some(observer);
            Ok(ObserverId(index))
        })
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers.lock(|slots| {
            if let Some(slot) = slots.borrow_mut().get_mut(id.0) {
                *slot = None;
            }
        });
    }

    /// Broadcasts `notice` on behalf of `panel`.
    pub fn notify(&self, panel: &'static str, notice: PanelNotice) {
        let snapshot = self.observers.lock(|slots| *slots.borrow());
        for observer in snapshot.into_iter().flatten() {
            observer.notify(panel, notice);
        }
    }

    /// Lists a panel under the registry.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] for duplicate names,
    /// [`PanelError::RegistryFull`] when the list is full.
    pub fn attach(&self, panel: &'static str) -> Result<(), PanelError> {
        self.panels.lock(|panels| {
            let mut panels = panels.borrow_mut();
            if panels.contains(&panel) {
                return Err(PanelError::InvalidArgument);
            }
            panels.push(panel).map_err(|_| PanelError::RegistryFull)
        })
    }

    pub fn detach(&self, panel: &'static str) {
        self.panels
            .lock(|panels| panels.borrow_mut().retain(|name| *name != panel));
    }

    #[must_use]
    pub fn is_attached(&self, panel: &'static str) -> bool {
        self.panels.lock(|panels| panels.borrow().contains(&panel))
    }

    #[must_use]
    pub fn panel_count(&self) -> usize {
        self.panels.lock(|panels| panels.borrow().len())
    }
}

impl<M: RawMutex> Default for PanelRegistry<'_, M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Health bits reported to error callbacks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CheckStatus {
    /// Connector missing, or the error flag tripped under power-down policy.
    pub no_device: bool,
    /// Display-detect reports the panel supply is off.
    pub display_off: bool,
}

impl CheckStatus {
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        !self.no_device && !self.display_off
    }
}

/// Recovery hooks owned by the display controller.
pub trait ErrorRecovery {
    /// Soft recovery after the command-error flag tripped.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn recover(&self, status: CheckStatus) -> Result<(), PanelError>;

    /// Full power-down after the command-error flag tripped.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn power_down(&self, status: CheckStatus) -> Result<(), PanelError>;
}

/// Slots for [`StateChangeCallback`] registrations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallbackId {
    /// Active-state transitions.
    State,
    /// Display mode applied.
    DisplayMode,
    /// Refresh rate changed as part of a display mode switch.
    RefreshRate,
}

impl CallbackId {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            CallbackId::State => 0,
            CallbackId::DisplayMode => 1,
            CallbackId::RefreshRate => 2,
        }
    }
}

/// Payload delivered to [`StateChangeCallback`]s.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateChange {
    Active(ActiveState),
    DisplayMode(DisplayMode),
    RefreshRate(u16),
}

pub trait StateChangeCallback {
    fn on_change(&self, id: CallbackId, change: StateChange);
}

/// Per-device callback table.
pub(crate) struct CallbackSlots<'a, M: RawMutex> {
    error: BlockingMutex<M, RefCell<Option<&'a dyn ErrorRecovery>>>,
    state: BlockingMutex<M, RefCell<[Option<&'a dyn StateChangeCallback>; CallbackId::COUNT]>>,
}

impl<'a, M: RawMutex> CallbackSlots<'a, M> {
    pub(crate) const fn new() -> Self {
        Self {
            error: BlockingMutex::new(RefCell::new(None)),
            state: BlockingMutex::new(RefCell::new([None; CallbackId::COUNT])),
        }
    }

    pub(crate) fn set_error(&self, callback: &'a dyn ErrorRecovery) {
        self.error.lock(|slot| *slot.borrow_mut() = Some(callback));
    }

    pub(crate) fn error(&self) -> Option<&'a dyn ErrorRecovery> {
        self.error.lock(|slot| *slot.borrow())
    }

    pub(crate) fn set_state(&self, id: CallbackId, callback: &'a dyn StateChangeCallback) {
        self.state
            .lock(|slots| slots.borrow_mut()[id.index()] = Some(callback));
    }

    pub(crate) fn fire(&self, id: CallbackId, change: StateChange) {
        let callback = self.state.lock(|slots| slots.borrow()[id.index()]);
        if let Some(callback) = callback {
            callback.on_change(id, change);
        }
    }
}
