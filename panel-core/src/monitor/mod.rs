//! Fault-monitor worker slots.
//!
//! One [`MonitorSlot`] exists per monitored signal plus one for the
//! frame-driven condition check. A slot carries the dispatch signal, the
//! cancellation token and the running counter that rejects overlapping
//! dispatches. The worker loop itself lives on the device
//! ([`crate::PanelDevice::run_monitor`]) because the handlers need the panel
//! locks; the slots only coordinate.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::error::PanelError;
use crate::pins::PinId;

pub mod condition;

pub use condition::{
    CHECK_FRAME_LIMIT, CHECK_SAMPLE_PERIOD, CheckState, ConditionCheck, FrameVerdict,
};

/// Workers owned by a panel device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MonitorKind {
    DispDet,
    Pcd,
    ConnDet,
    ErrFg,
    Condition,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 5] = [
        MonitorKind::DispDet,
        MonitorKind::Pcd,
        MonitorKind::ConnDet,
        MonitorKind::ErrFg,
        MonitorKind::Condition,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            MonitorKind::DispDet => "disp-det",
            MonitorKind::Pcd => "pcd",
            MonitorKind::ConnDet => "conn-det",
            MonitorKind::ErrFg => "err-fg",
            MonitorKind::Condition => "condition",
        }
    }

    /// Signal whose interrupt feeds this worker.
    #[must_use]
    pub const fn pin(self) -> Option<PinId> {
        match self {
            MonitorKind::DispDet => Some(PinId::DispDet),
            MonitorKind::Pcd => Some(PinId::Pcd),
            MonitorKind::ConnDet => Some(PinId::ConnDet),
            MonitorKind::ErrFg => Some(PinId::ErrFg),
            MonitorKind::Condition => None,
        }
    }

    /// Worker serving interrupts from `pin`, if any.
    #[must_use]
    pub const fn for_pin(pin: PinId) -> Option<Self> {
        match pin {
            PinId::DispDet => Some(MonitorKind::DispDet),
            PinId::Pcd => Some(MonitorKind::Pcd),
            PinId::ConnDet => Some(MonitorKind::ConnDet),
            PinId::ErrFg => Some(MonitorKind::ErrFg),
            PinId::Reset | PinId::DispTe => None,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coordination state for one worker.
pub struct MonitorSlot<M: RawMutex> {
    kind: MonitorKind,
    running: AtomicU8,
    started: AtomicBool,
    dispatches: AtomicU32,
    rejected: AtomicU32,
    request: Signal<M, ()>,
    cancel: Signal<M, ()>,
    finished: Signal<M, ()>,
    last_result: BlockingMutex<M, Cell<Option<Result<(), PanelError>>>>,
}

impl<M: RawMutex> MonitorSlot<M> {
    const fn new(kind: MonitorKind) -> Self {
        Self {
            kind,
            running: AtomicU8::new(0),
            started: AtomicBool::new(false),
            dispatches: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            request: Signal::new(),
            cancel: Signal::new(),
            finished: Signal::new(),
            last_result: BlockingMutex::new(Cell::new(None)),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MonitorKind {
        self.kind
    }

    /// Returns `true` while a handler is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != 0
    }

    /// Returns `true` once a worker loop has attached to the slot.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Completed handler runs.
    #[must_use]
    pub fn dispatches(&self) -> u32 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Dispatches dropped because a handler was already running.
    #[must_use]
    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_result(&self) -> Option<Result<(), PanelError>> {
        self.last_result.lock(Cell::get)
    }

    pub(crate) fn try_enter(&self) -> bool {
        let entered = self
            .running
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !entered {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        entered
    }

    pub(crate) fn leave(&self, result: Result<(), PanelError>) {
        self.last_result.lock(|cell| cell.set(Some(result)));
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.running.store(0, Ordering::Release);
    }

    pub(crate) fn request(&self) {
        self.request.signal(());
    }

    pub(crate) async fn requested(&self) {
        self.request.wait().await;
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.wait().await;
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.signal(());
    }
}

/// Every worker slot of one device plus the shared cancellation flag.
pub struct Monitors<M: RawMutex> {
    slots: [MonitorSlot<M>; 5],
    cancelled: AtomicBool,
}

impl<M: RawMutex> Monitors<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [
                MonitorSlot::new(MonitorKind::DispDet),
                MonitorSlot::new(MonitorKind::Pcd),
                MonitorSlot::new(MonitorKind::ConnDet),
                MonitorSlot::new(MonitorKind::ErrFg),
                MonitorSlot::new(MonitorKind::Condition),
            ],
            cancelled: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn slot(&self, kind: MonitorKind) -> &MonitorSlot<M> {
        &self.slots[kind.index()]
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wakes the worker for `kind`. Ignored after cancellation.
    pub fn request(&self, kind: MonitorKind) {
        if !self.is_cancelled() {
            self.slot(kind).request();
        }
    }

    /// Attaches a worker loop; `false` when the device is already torn down.
    pub(crate) fn start(&self, kind: MonitorKind) -> bool {
        self.slot(kind).mark_started();
        !self.is_cancelled()
    }

    /// Cancels every worker and waits for each started loop to exit.
    ///
    /// A handler that is already running completes before its loop exits.
    /// Only the first call waits; later calls return right away.
    pub async fn shutdown(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.slots {
            slot.cancel.signal(());
        }
        for slot in &self.slots {
            if slot.is_started() {
                slot.finished.wait().await;
                panel_debug!("{} worker stopped", slot.kind);
            }
        }
    }
}

impl<M: RawMutex> Default for Monitors<M> {
    fn default() -> Self {
        Self::new()
    }
}
