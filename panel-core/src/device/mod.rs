//! Panel device: the active-state machine and its locks.
//!
//! A [`PanelDevice`] owns the panel state, the pin bank, the power-control
//! engine, the family capability object and the worker slots. Public
//! operations are `async` and take `&self`, so the device can be shared
//! between the command dispatcher and the monitor tasks.
//!
//! Lock order is fixed: the family ("brightness") lock, then the state lock.
//! The pin lock is a blocking leaf lock; nothing awaits or takes another lock
//! while holding it.

use core::cell::RefCell;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::bypass::{self, BypassReport, BypassSignals};
use crate::clock::PanelClock;
use crate::config::PanelConfig;
use crate::error::{self, PanelError};
use crate::family::{DisplayMode, PanelFamily};
use crate::monitor::{ConditionCheck, Monitors};
use crate::pins::{PinBank, PinDriver, PinId, PinState};
use crate::power::{PowerControl, RegulatorDriver, names};
use crate::registry::{CallbackId, CallbackSlots, PanelNotice, PanelRegistry, StateChange};
use crate::state::{ActiveState, Connection, PanelState, PowerState};
use crate::telemetry::{PanelEvent, TelemetryRecorder};

mod ops;
mod workers;

/// State guarded by the state lock.
struct Inner<R> {
    state: PanelState,
    power: PowerControl<R>,
    /// Full-init retries left for the current sleep-out.
    sleep_out_retries: u8,
    panel_on_at: Option<Duration>,
    display_mode: Option<DisplayMode>,
    /// Mode requested while asleep, applied by the next sleep-out.
    pending_mode: Option<DisplayMode>,
}

/// One physical panel.
pub struct PanelDevice<'a, M, P, R, C, F>
where
    M: RawMutex,
    P: PinDriver,
    R: RegulatorDriver,
    C: PanelClock,
    F: PanelFamily,
{
    config: PanelConfig,
    registry: &'a PanelRegistry<'a, M>,
    clock: C,
    family: Mutex<M, F>,
    inner: Mutex<M, Inner<R>>,
    pins: BlockingMutex<M, RefCell<PinBank<P>>>,
    monitors: Monitors<M>,
    check: BlockingMutex<M, RefCell<ConditionCheck>>,
    callbacks: CallbackSlots<'a, M>,
    telemetry: BlockingMutex<M, RefCell<TelemetryRecorder>>,
    connector_events: AtomicU32,
}

impl<'a, M, P, R, C, F> PanelDevice<'a, M, P, R, C, F>
where
    M: RawMutex,
    P: PinDriver,
    R: RegulatorDriver,
    C: PanelClock,
    F: PanelFamily,
{
    /// Assembles a device in the `OFF` state. Nothing touches hardware until
    /// [`PanelDevice::probe`] or a power operation runs.
    #[must_use]
    pub fn new(
        config: PanelConfig,
        registry: &'a PanelRegistry<'a, M>,
        pins: PinBank<P>,
        power: PowerControl<R>,
        clock: C,
        family: F,
    ) -> Self {
        Self {
            config,
            registry,
            clock,
            family: Mutex::new(family),
            inner: Mutex::new(Inner {
                state: PanelState::new(),
                power,
                sleep_out_retries: config.sleep_out_retries,
                panel_on_at: None,
                display_mode: None,
                pending_mode: None,
            }),
            pins: BlockingMutex::new(RefCell::new(pins)),
            monitors: Monitors::new(),
            check: BlockingMutex::new(RefCell::new(ConditionCheck::new())),
            callbacks: CallbackSlots::new(),
            telemetry: BlockingMutex::new(RefCell::new(TelemetryRecorder::new())),
            connector_events: AtomicU32::new(0),
        }
    }

    /// Panel name, also the power-sequence owner.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.config.owner
    }

    #[must_use]
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[must_use]
    pub fn monitors(&self) -> &Monitors<M> {
        &self.monitors
    }

    /// Snapshot of the panel state.
    pub async fn state(&self) -> PanelState {
        self.inner.lock().await.state
    }

    /// Full-init retries left before sleep-out gives up.
    pub async fn sleep_out_retries(&self) -> u8 {
        self.inner.lock().await.sleep_out_retries
    }

    /// Mode currently programmed into the panel.
    pub async fn display_mode(&self) -> Option<DisplayMode> {
        self.inner.lock().await.display_mode
    }

    /// `true` once crack-detect failed and frame timing is no longer trusted.
    pub async fn ignores_frame_timing(&self) -> bool {
        self.inner.lock().await.state.ignore_frame_timing
    }

    /// Current bypass status with its reason, evaluated from live signals.
    pub async fn bypass_report(&self) -> BypassReport {
        let inner = self.inner.lock().await;
        self.report(&inner)
    }

    /// Connector-detect events handled since construction.
    #[must_use]
    pub fn connector_events(&self) -> u32 {
        self.connector_events.load(Ordering::Relaxed)
    }

    /// Condition-check bookkeeping.
    #[must_use]
    pub fn condition_check(&self) -> ConditionCheck {
        self.check.lock(|check| *check.borrow())
    }

    /// Runs `f` against the telemetry ring.
    pub fn with_telemetry<T>(&self, f: impl FnOnce(&TelemetryRecorder) -> T) -> T {
        self.telemetry.lock(|recorder| f(&*recorder.borrow()))
    }

    /// Runs `f` against the pin bank under the pin lock.
    ///
    /// `f` must not block.
    pub fn with_pins<T>(&self, f: impl FnOnce(&mut PinBank<P>) -> T) -> T {
        self.pins.lock(|bank| f(&mut *bank.borrow_mut()))
    }

    fn record(&self, event: PanelEvent) {
        let now = self.clock.now();
        self.telemetry.lock(|recorder| {
            recorder.borrow_mut().record(event, now);
        });
    }

    fn sample(&self, id: PinId) -> Result<Option<PinState>, PanelError> {
        self.with_pins(|bank| bank.optional_state(id))
    }

    fn has_pin(&self, id: PinId) -> bool {
        self.with_pins(|bank| bank.contains(id))
    }

    fn enable_irq(&self, id: PinId) {
        let result = self.with_pins(|bank| {
            if bank.is_irq_registered(id) {
                bank.enable_irq(id).map(|_| ())
            } else {
                Ok(())
            }
        });
        if let Err(err) = result {
            panel_warn!("{}: enabling {} irq failed: {}", self.name(), id, err);
        }
    }

    fn disable_irq(&self, id: PinId) {
        let result = self.with_pins(|bank| {
            if bank.is_irq_enabled(id) {
                bank.disable_irq(id).map(|_| ())
            } else {
                Ok(())
            }
        });
        if let Err(err) = result {
            panel_warn!("{}: disabling {} irq failed: {}", self.name(), id, err);
        }
    }

    /// Display-detect and crack-detect interrupts, live only while awake.
    fn enable_fault_irqs(&self) {
        self.enable_irq(PinId::DispDet);
        self.enable_irq(PinId::Pcd);
    }

    fn disable_fault_irqs(&self) {
        self.disable_irq(PinId::DispDet);
        self.disable_irq(PinId::Pcd);
    }

    fn ignore_frame_timing(&self, inner: &mut Inner<R>) {
        if !inner.state.ignore_frame_timing {
            inner.state.ignore_frame_timing = true;
            self.record(PanelEvent::FrameTimingIgnored);
        }
    }

    fn clear_check(&self) {
        self.check.lock(|check| check.borrow_mut().clear());
    }

    /// Executes a power sequence; a bypassed panel is left untouched.
    async fn run_sequence(
        &self,
        inner: &mut Inner<R>,
        name: &'static str,
    ) -> Result<(), PanelError> {
        let bypass = inner.state.bypass;
        let result = inner
            .power
            .execute(self.config.owner, name, bypass, &self.clock, |pin, level| {
                self.with_pins(|bank| bank.write_level(pin, level))
            })
            .await;

        match result {
            Ok(()) | Err(PanelError::NotFound) => {}
            Err(error) => self.record(PanelEvent::SequenceFailed {
                sequence: name,
                error,
            }),
        }
        result
    }

    /// Runs the power sequence for `power`; the state follows only on
    /// success. Already in `power` is a no-op.
    async fn set_power(&self, inner: &mut Inner<R>, power: PowerState) -> Result<(), PanelError> {
        if inner.state.power == power {
            return Ok(());
        }
        let sequence = match power {
            PowerState::On => names::POWER_ON,
            PowerState::Off => names::POWER_OFF,
        };
        error::optional(self.run_sequence(inner, sequence).await)?;
        inner.state.power = power;
        Ok(())
    }

    /// Powers down and lands in `OFF` without going through sleep-in.
    async fn cut_power(&self, inner: &mut Inner<R>) -> Result<(), PanelError> {
        self.set_power(inner, PowerState::Off).await?;
        error::optional(self.run_sequence(inner, names::FD_DISABLE).await)?;
        self.land_off(inner);
        Ok(())
    }

    /// Cuts power for a panel that is gone; the state lands in `OFF` even
    /// when a sequence fails.
    async fn force_off(&self, inner: &mut Inner<R>) {
        if let Err(err) = self.cut_power(inner).await {
            panel_warn!("{}: forced power off failed: {}", self.name(), err);
            inner.state.power = PowerState::Off;
            self.land_off(inner);
        }
    }

    fn land_off(&self, inner: &mut Inner<R>) {
        inner.state.display_on = false;
        inner.panel_on_at = None;
        self.clear_check();
        self.set_active(inner, ActiveState::Off);
    }

    fn set_active(&self, inner: &mut Inner<R>, to: ActiveState) {
        let from = inner.state.active;
        if from == to {
            return;
        }

        inner.state.active = to;
        let now = self.clock.now();
        self.telemetry.lock(|recorder| {
            recorder.borrow_mut().record_transition(from, to, now);
        });
        panel_info!("{}: {} -> {}", self.name(), from, to);
        self.registry
            .notify(self.name(), PanelNotice::StateChanged { from, to });
        self.callbacks
            .fire(CallbackId::State, StateChange::Active(to));
    }

    fn set_bypass(&self, inner: &mut Inner<R>, bypass: bool) {
        if inner.state.bypass == bypass {
            return;
        }

        inner.state.bypass = bypass;
        if bypass {
            let report = self.report(inner);
            panel_warn!("{}: {}", self.name(), report);
            self.record(PanelEvent::BypassSet(report.reason));
        } else {
            panel_info!("{}: bypass cleared", self.name());
            self.record(PanelEvent::BypassCleared);
        }
    }

    fn report(&self, inner: &Inner<R>) -> BypassReport {
        let sample = |id: PinId| self.sample(id).ok().flatten();
        let signals = BypassSignals {
            bypass: inner.state.bypass,
            connector: sample(PinId::ConnDet),
            disp_det: sample(PinId::DispDet),
            panel_id: inner.state.panel_id,
            pcd: sample(PinId::Pcd),
        };
        BypassReport {
            bypass: signals.bypass,
            reason: bypass::evaluate(&signals),
        }
    }

    fn log_bypassed(&self, inner: &Inner<R>, operation: &'static str) {
        let report = self.report(inner);
        panel_info!("{}: {} skipped, {}", self.name(), operation, report);
    }

    /// Stores the connector status and tells observers about it.
    fn update_connection(&self, inner: &mut Inner<R>, connection: Connection) {
        if inner.state.connected != connection {
            inner.state.connected = connection;
            self.record(PanelEvent::ConnectorChanged(connection));
        }
        self.registry
            .notify(self.name(), PanelNotice::Connector(connection));
    }

    /// Samples the connector ahead of a power-up.
    ///
    /// A disconnected panel is bypassed and reported as absent; a panel that
    /// comes back after a disconnect leaves bypass.
    fn check_connector(&self, inner: &mut Inner<R>) -> Result<(), PanelError> {
        let previous = inner.state.connected;
        let connection = Connection::from_sample(self.sample(PinId::ConnDet)?);
        self.update_connection(inner, connection);

        match connection {
            Connection::Disconnected => {
                panel_warn!("{}: connector is disconnected", self.name());
                self.set_bypass(inner, true);
                Err(PanelError::NotFound)
            }
            Connection::Connected if previous.is_disconnected() => {
                panel_info!("{}: connector is back", self.name());
                self.set_bypass(inner, false);
                Ok(())
            }
            Connection::Connected | Connection::Unsupported => Ok(()),
        }
    }
}
