//! Fault-monitor handlers and the worker loop.
//!
//! The platform spawns one task per [`MonitorKind`] running
//! [`PanelDevice::run_monitor`] and forwards edges through
//! [`PanelDevice::irq_fired`]. Handlers never hold the pin lock across an
//! await and take the family lock before the state lock.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use portable_atomic::Ordering;

use super::PanelDevice;
use crate::clock::{self, PanelClock};
use crate::error::PanelError;
use crate::family::PanelFamily;
use crate::monitor::{CheckState, MonitorKind};
use crate::pins::{PinDriver, PinId, PinState};
use crate::power::RegulatorDriver;
use crate::registry::PanelNotice;
use crate::state::{Connection, PowerState};
use crate::telemetry::PanelEvent;

impl<M, P, R, C, F> PanelDevice<'_, M, P, R, C, F>
where
    M: RawMutex,
    P: PinDriver,
    R: RegulatorDriver,
    C: PanelClock,
    F: PanelFamily,
{
    /// Worker loop for `kind`; returns once the device is torn down.
    pub async fn run_monitor(&self, kind: MonitorKind) {
        let slot = self.monitors.slot(kind);
        if self.monitors.start(kind) {
            panel_debug!("{}: {} worker started", self.name(), kind);
            loop {
                match select(slot.requested(), slot.cancelled()).await {
                    Either::First(()) if !self.monitors.is_cancelled() => {
                        let _ = self.dispatch(kind).await;
                    }
                    Either::First(()) | Either::Second(()) => break,
                }
            }
        }
        slot.mark_finished();
    }

    /// Runs the handler for `kind` once.
    ///
    /// Returns `None` when the worker is already running; overlapping
    /// dispatches are dropped.
    pub async fn dispatch(&self, kind: MonitorKind) -> Option<Result<(), PanelError>> {
        let slot = self.monitors.slot(kind);
        if !slot.try_enter() {
            panel_debug!("{}: {} worker busy", self.name(), kind);
            return None;
        }

        let result = match kind {
            MonitorKind::DispDet => self.on_disp_det().await,
            MonitorKind::Pcd => self.on_pcd().await,
            MonitorKind::ConnDet => self.on_conn_det().await,
            MonitorKind::ErrFg => self.on_err_fg().await,
            MonitorKind::Condition => self.on_condition().await,
        };
        slot.leave(result);

        if let Err(err) = result {
            panel_warn!("{}: {} worker failed: {}", self.name(), kind, err);
        }
        self.record(PanelEvent::MonitorFinished {
            monitor: kind,
            result,
        });
        Some(result)
    }

    /// Edge reported by the platform interrupt for `pin`.
    ///
    /// Masked interrupts only latch a pending edge; enabled ones wake the
    /// matching worker.
    pub fn irq_fired(&self, pin: PinId) {
        let Some(kind) = MonitorKind::for_pin(pin) else {
            return;
        };
        if self.with_pins(|bank| bank.latch_edge(pin)) {
            self.record(PanelEvent::IrqDispatched(pin));
            self.monitors.request(kind);
        }
    }

    /// Tears the device down.
    ///
    /// Masks and detaches every interrupt, cancels every worker and waits for
    /// the started ones to exit, then leaves the registry.
    pub async fn remove(&self) {
        let masked = self.with_pins(|bank| {
            let masked = bank.disable_all_irqs();
            for pin in PinId::ALL {
                if bank.is_irq_registered(pin)
                    && let Err(err) = bank.unregister_irq(pin)
                {
                    panel_warn!("{}: unregistering {} irq failed: {}", self.name(), pin, err);
                }
            }
            masked
        });
        if !masked.is_empty() {
            panel_debug!("{}: interrupts masked for removal", self.name());
        }
        self.monitors.shutdown().await;
        self.clear_check();
        self.registry.detach(self.name());
        panel_info!("{}: removed", self.name());
    }

    async fn debounce(&self) {
        clock::delay(&self.clock, self.config.debounce).await;
    }

    async fn on_disp_det(&self) -> Result<(), PanelError> {
        self.disable_irq(PinId::DispDet);
        let first = self.with_pins(|bank| bank.state(PinId::DispDet))?;
        self.debounce().await;
        let state = self.with_pins(|bank| bank.state(PinId::DispDet))?;
        panel_debug!("{}: disp-det {} then {}", self.name(), first, state);

        if state.is_ok() {
            if self.inner.lock().await.state.active.is_display_active() {
                self.enable_fault_irqs();
            }
            return Ok(());
        }

        let connection = Connection::from_sample(self.sample(PinId::ConnDet)?);
        if !connection.is_disconnected() {
            panel_warn!(
                "{}: panel supply lost, disp-det stays masked until the next wake",
                self.name()
            );
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().await;
            panel_warn!("{}: supply lost with the connector out, forcing off", self.name());
            self.disable_irq(PinId::Pcd);
            self.force_off(&mut inner).await;
            self.set_bypass(&mut inner, true);
            self.update_connection(&mut inner, Connection::Disconnected);
        }
        clock::delay(&self.clock, self.config.forced_off_settle).await;
        Ok(())
    }

    async fn on_pcd(&self) -> Result<(), PanelError> {
        self.disable_irq(PinId::Pcd);
        self.debounce().await;
        let state = self.with_pins(|bank| bank.state(PinId::Pcd))?;

        let mut inner = self.inner.lock().await;
        if state == PinState::Nok {
            panel_warn!("{}: crack detected, frame timing ignored", self.name());
            self.ignore_frame_timing(&mut inner);
        }
        if inner.state.active.is_display_active() {
            self.enable_irq(PinId::Pcd);
        }
        Ok(())
    }

    async fn on_conn_det(&self) -> Result<(), PanelError> {
        self.disable_irq(PinId::ConnDet);
        self.debounce().await;
        let connection = Connection::from_sample(self.sample(PinId::ConnDet)?);
        self.connector_events.fetch_add(1, Ordering::Relaxed);
        panel_info!("{}: connector {}", self.name(), connection);

        {
            let mut inner = self.inner.lock().await;
            self.update_connection(&mut inner, connection);
            if connection.is_disconnected() {
                if self.config.connector_uevent {
                    self.registry
                        .notify(self.name(), PanelNotice::ConnectorUevent);
                }
                // Without display-detect nothing else notices the lost panel.
                if !self.has_pin(PinId::DispDet) && inner.state.power == PowerState::On {
                    self.disable_fault_irqs();
                    self.force_off(&mut inner).await;
                    self.set_bypass(&mut inner, true);
                }
            }
        }

        self.enable_irq(PinId::ConnDet);
        Ok(())
    }

    async fn on_err_fg(&self) -> Result<(), PanelError> {
        let policy = self.config.err_flag;
        if !policy.is_active() {
            return Ok(());
        }
        if !self.inner.lock().await.state.active.is_display_active() {
            return Ok(());
        }
        if self.with_pins(|bank| bank.state(PinId::ErrFg))?.is_ok() {
            return Ok(());
        }

        self.disable_irq(PinId::ErrFg);
        self.debounce().await;

        let mut status = self.check_status();
        let result = match self.callbacks.error() {
            None => {
                panel_warn!("{}: err-fg tripped with no recovery callback", self.name());
                Ok(())
            }
            Some(callback) if policy.powerdown => {
                panel_warn!("{}: err-fg tripped, powering down", self.name());
                status.no_device = true;
                self.registry.notify(
                    self.name(),
                    PanelNotice::Connector(Connection::Disconnected),
                );
                let result = callback.power_down(status);
                self.registry
                    .notify(self.name(), PanelNotice::Connector(Connection::Connected));
                result
            }
            Some(callback) => {
                panel_warn!("{}: err-fg tripped, recovering", self.name());
                callback.recover(status)
            }
        };

        self.enable_irq(PinId::ErrFg);
        result
    }

    async fn on_condition(&self) -> Result<(), PanelError> {
        let Some(work) = self.check.lock(|check| check.borrow().pending()) else {
            return Ok(());
        };

        let mut family = self.family.lock().await;
        if !self.inner.lock().await.state.active.is_display_active() {
            return Ok(());
        }

        if matches!(work, CheckState::PrintNormal | CheckState::PrintDoze) {
            let dumped = family.check_condition().await;
            if let Err(err) = dumped {
                panel_warn!("{}: condition dump failed: {}", self.name(), err);
            }
        }

        let black = if matches!(work, CheckState::PrintNormal | CheckState::CheckNormal) {
            match family.activity_metric().await {
                Ok(metric) => metric.map(|value| value == 0),
                Err(err) => {
                    panel_warn!("{}: activity read failed: {}", self.name(), err);
                    None
                }
            }
        } else {
            None
        };

        if black == Some(true) && work == CheckState::PrintNormal {
            panel_info!("{}: screen reads black, watching", self.name());
        }
        self.check
            .lock(|check| check.borrow_mut().complete(work, black));
        Ok(())
    }
}
