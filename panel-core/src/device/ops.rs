//! Public panel operations.

use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{Inner, PanelDevice};
use crate::clock::{self, PanelClock};
use crate::error::{self, PanelError};
use crate::family::PanelFamily;
use crate::monitor::{FrameVerdict, MonitorKind};
use crate::pins::{self, PinDriver, PinId, PinState};
use crate::power::{RegulatorDriver, names};
use crate::registry::{
    CallbackId, CheckStatus, ErrorRecovery, StateChange, StateChangeCallback,
};
use crate::state::{ActiveState, Connection, PowerState};
use crate::telemetry::PanelEvent;

impl<'a, M, P, R, C, F> PanelDevice<'a, M, P, R, C, F>
where
    M: RawMutex,
    P: PinDriver,
    R: RegulatorDriver,
    C: PanelClock,
    F: PanelFamily,
{
    /// Probe-time bring-up.
    ///
    /// Initializes the rails, reads the panel identifier, registers the
    /// monitored interrupts and lists the panel in the registry. An
    /// unreadable identifier bypasses the panel instead of failing, so the
    /// rest of the system keeps booting.
    ///
    /// # Errors
    ///
    /// Family preparation failures, pin driver failures and registry errors.
    pub async fn probe(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        if let Err(err) = inner.power.init_regulators() {
            panel_warn!("{}: regulator init failed: {}", self.name(), err);
        }

        let panel_id = match family.read_panel_id().await {
            Ok(id) => id,
            Err(err) => {
                panel_warn!("{}: panel id read failed: {}", self.name(), err);
                0
            }
        };
        inner.state.panel_id = panel_id;
        if panel_id == 0 {
            self.set_bypass(&mut inner, true);
        } else {
            panel_info!("{}: {} panel, id {}", self.name(), family.name(), panel_id);
            family.prepare(panel_id).await?;
        }

        inner.state.connected = Connection::from_sample(self.sample(PinId::ConnDet)?);

        self.with_pins(|bank| {
            for pin in MonitorKind::ALL.into_iter().filter_map(MonitorKind::pin) {
                if bank.is_irq_valid(pin) {
                    bank.register_irq(pin)?;
                }
            }
            Ok::<(), PanelError>(())
        })?;
        self.enable_irq(PinId::ConnDet);
        if self.config.err_flag.is_active() {
            self.enable_irq(PinId::ErrFg);
        }
        self.clear_check();

        self.registry.attach(self.name())
    }

    /// Powers the panel supplies (`OFF` to `ON`).
    ///
    /// # Errors
    ///
    /// - [`PanelError::NotFound`] when the connector reads disconnected; the
    ///   panel is bypassed in that case.
    /// - [`PanelError::SequenceActionFailed`] when the power-on sequence
    ///   fails; the panel stays in `OFF`.
    pub async fn power_on(&self) -> Result<(), PanelError> {
        let mut inner = self.inner.lock().await;
        self.power_on_locked(&mut inner).await
    }

    async fn power_on_locked(&self, inner: &mut Inner<R>) -> Result<(), PanelError> {
        self.check_connector(inner)?;
        if inner.state.bypass {
            self.log_bypassed(inner, "power on");
            return Ok(());
        }
        self.power_up(inner).await
    }

    async fn power_up(&self, inner: &mut Inner<R>) -> Result<(), PanelError> {
        if inner.state.active != ActiveState::Off {
            return Ok(());
        }
        self.set_power(inner, PowerState::On).await?;
        self.set_active(inner, ActiveState::On);
        Ok(())
    }

    /// Sleeps the panel if needed, then cuts its supplies.
    ///
    /// # Errors
    ///
    /// [`PanelError::SequenceActionFailed`] when the power-off or
    /// frame-done-disable sequence fails; the panel stays in `ON`.
    pub async fn power_off(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        if inner.state.bypass {
            self.log_bypassed(&inner, "power off");
            return Ok(());
        }

        self.sleep_in_locked(&mut family, &mut inner).await;
        if inner.state.active == ActiveState::Off {
            return Ok(());
        }
        self.cut_power(&mut inner).await
    }

    /// Puts an awake panel to sleep (`NORMAL`/`LPM` to `ON`).
    ///
    /// # Errors
    ///
    /// None today; command failures are logged.
    pub async fn sleep_in(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;
        self.sleep_in_locked(&mut family, &mut inner).await;
        Ok(())
    }

    async fn sleep_in_locked(&self, family: &mut F, inner: &mut Inner<R>) {
        if inner.state.bypass {
            self.log_bypassed(inner, "sleep in");
            return;
        }
        if !inner.state.active.is_display_active() {
            return;
        }

        if inner.state.display_on {
            if let Err(err) = family.display_off_commands().await {
                panel_warn!("{}: display off failed: {}", self.name(), err);
            }
            inner.state.display_on = false;
        }
        self.disable_fault_irqs();
        if let Err(err) = family.exit_commands().await {
            panel_warn!("{}: sleep in commands failed: {}", self.name(), err);
        }
        self.clear_check();
        self.set_active(inner, ActiveState::On);
    }

    /// Wakes the panel into `NORMAL`, powering it first when needed.
    ///
    /// A failed initialization is retried with a full power cycle while the
    /// per-device budget lasts.
    ///
    /// # Errors
    ///
    /// - [`PanelError::NotFound`] when the connector reads disconnected.
    /// - [`PanelError::Timeout`] when display-detect does not come back after
    ///   a doze exit; the panel stays in `LPM`.
    /// - [`PanelError::FatalIntegration`] when every retry failed while
    ///   crack-detect reports a healthy panel.
    pub async fn sleep_out(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;
        self.sleep_out_locked(&mut family, &mut inner).await
    }

    async fn sleep_out_locked(
        &self,
        family: &mut F,
        inner: &mut Inner<R>,
    ) -> Result<(), PanelError> {
        self.check_connector(inner)?;
        if inner.state.bypass {
            self.log_bypassed(inner, "sleep out");
            return Ok(());
        }

        match inner.state.active {
            ActiveState::Normal => Ok(()),
            ActiveState::Lpm => self.exit_lpm(family, inner).await,
            ActiveState::Off | ActiveState::On => self.init_with_retries(family, inner).await,
        }
    }

    async fn init_with_retries(
        &self,
        family: &mut F,
        inner: &mut Inner<R>,
    ) -> Result<(), PanelError> {
        loop {
            match self.init_panel(family, inner).await {
                Ok(()) => {
                    self.finish_sleep_out(inner);
                    return Ok(());
                }
                Err(error) if inner.state.bypass => return Err(error),
                Err(error) if inner.sleep_out_retries == 0 => {
                    return self.init_exhausted(inner, error);
                }
                Err(error) => {
                    if let Err(err) = self.power_cycle(inner, error).await {
                        inner.sleep_out_retries = self.config.sleep_out_retries;
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn power_cycle(
        &self,
        inner: &mut Inner<R>,
        error: PanelError,
    ) -> Result<(), PanelError> {
        inner.sleep_out_retries -= 1;
        let budget = self.config.sleep_out_retries;
        let attempt = budget.saturating_sub(inner.sleep_out_retries);
        panel_warn!(
            "{}: init failed: {}, retry {} of {}",
            self.name(),
            error,
            attempt,
            budget
        );
        self.record(PanelEvent::SleepOutRetry { attempt, budget });

        self.cut_power(inner).await?;
        clock::delay(&self.clock, self.config.retry_settle).await;
        Ok(())
    }

    async fn init_panel(&self, family: &mut F, inner: &mut Inner<R>) -> Result<(), PanelError> {
        self.power_up(inner).await?;
        error::optional(self.run_sequence(inner, names::POWER_INIT).await)?;
        family.init_interface().await?;
        family.init_commands().await?;
        self.restore_mode(family, inner).await;

        if let Err(err) = self.poll_nominal(PinId::DispDet).await {
            panel_warn!("{}: supply not up after init: {}", self.name(), err);
            return Err(err);
        }
        if let Err(err) = self.poll_nominal(PinId::Pcd).await {
            panel_warn!("{}: crack detect abnormal after init: {}", self.name(), err);
            self.ignore_frame_timing(inner);
        }

        error::optional(self.run_sequence(inner, names::FD_ENABLE).await)
    }

    fn finish_sleep_out(&self, inner: &mut Inner<R>) {
        inner.sleep_out_retries = self.config.sleep_out_retries;
        self.enable_fault_irqs();
        inner.panel_on_at = Some(self.clock.now());
        self.clear_check();
        self.set_active(inner, ActiveState::Normal);
    }

    fn init_exhausted(&self, inner: &mut Inner<R>, error: PanelError) -> Result<(), PanelError> {
        inner.sleep_out_retries = self.config.sleep_out_retries;

        if let Ok(Some(PinState::Nok)) = self.sample(PinId::Pcd) {
            panel_warn!("{}: init failed on a cracked panel: {}", self.name(), error);
            self.ignore_frame_timing(inner);
            self.set_bypass(inner, true);
            self.enable_fault_irqs();
            inner.panel_on_at = Some(self.clock.now());
            self.set_active(inner, ActiveState::Normal);
            return Ok(());
        }

        panel_error!(
            "{}: init keeps failing on a healthy panel: {}",
            self.name(),
            error
        );
        Err(PanelError::FatalIntegration)
    }

    async fn exit_lpm(&self, family: &mut F, inner: &mut Inner<R>) -> Result<(), PanelError> {
        error::optional(self.run_sequence(inner, names::EXIT_ALPM_PRE).await)?;
        self.disable_irq(PinId::DispDet);
        if let Err(err) = error::optional(self.run_sequence(inner, names::EXIT_ALPM).await) {
            self.enable_irq(PinId::DispDet);
            return Err(err);
        }
        match family.alpm_exit_commands().await {
            Ok(()) | Err(PanelError::Unsupported) => {}
            Err(err) => panel_warn!("{}: doze exit commands failed: {}", self.name(), err),
        }
        if inner.pending_mode.is_some() {
            self.restore_mode(family, inner).await;
        }
        self.enable_irq(PinId::DispDet);

        if let Err(err) = self.poll_nominal(PinId::DispDet).await {
            panel_warn!("{}: supply not up after doze exit: {}", self.name(), err);
            return Err(err);
        }

        self.clear_check();
        self.set_active(inner, ActiveState::Normal);
        Ok(())
    }

    /// Polls a wired pin until it reads nominal; absent pins pass.
    async fn poll_nominal(&self, id: PinId) -> Result<(), PanelError> {
        if !self.has_pin(id) {
            return Ok(());
        }
        pins::poll(
            &self.clock,
            self.config.poll_attempts,
            self.config.poll_interval,
            || self.with_pins(|bank| bank.state(id)).map(PinState::is_ok),
        )
        .await
    }

    /// Re-applies the requested or current display mode after the panel lost
    /// its registers.
    async fn restore_mode(&self, family: &mut F, inner: &mut Inner<R>) {
        let Some(mode) = inner.pending_mode.or(inner.display_mode) else {
            return;
        };
        match family.apply_display_mode(mode).await {
            Ok(()) => {
                inner.display_mode = Some(mode);
                inner.pending_mode = None;
            }
            Err(err) => panel_warn!(
                "{}: display mode {} not applied: {}",
                self.name(),
                mode.index,
                err
            ),
        }
    }

    /// Enters the low-power display mode, waking the panel first if needed.
    ///
    /// # Errors
    ///
    /// Whatever [`PanelDevice::sleep_out`] reports when the panel had to be
    /// woken, and [`PanelError::Unsupported`] for families without doze.
    pub async fn doze(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        if inner.state.bypass {
            self.log_bypassed(&inner, "doze");
            return Ok(());
        }
        match inner.state.active {
            ActiveState::Lpm => return Ok(()),
            ActiveState::Off | ActiveState::On => {
                self.sleep_out_locked(&mut family, &mut inner).await?;
                if inner.state.bypass {
                    return Ok(());
                }
            }
            ActiveState::Normal => {}
        }

        self.wait_alpm_delay(&inner).await;
        self.disable_irq(PinId::DispDet);
        if let Err(err) = family.alpm_enter_commands().await {
            self.enable_irq(PinId::DispDet);
            panel_warn!("{}: doze entry failed: {}", self.name(), err);
            return Err(err);
        }
        let entered = error::optional(self.run_sequence(&mut inner, names::ENTER_ALPM).await);
        self.enable_irq(PinId::DispDet);
        if let Err(err) = entered {
            panel_warn!("{}: doze power sequence failed: {}", self.name(), err);
            return Err(err);
        }
        self.clear_check();
        self.set_active(&mut inner, ActiveState::Lpm);
        Ok(())
    }

    /// Honours the minimum panel-on time configured for doze entry.
    async fn wait_alpm_delay(&self, inner: &Inner<R>) {
        let Some(minimum) = inner.power.leading_delay(self.name(), names::ALPM_DELAY) else {
            return;
        };
        let Some(on_at) = inner.panel_on_at else {
            return;
        };
        let elapsed = self.clock.now().saturating_sub(on_at);
        if let Some(remaining) = minimum.checked_sub(elapsed) {
            clock::delay(&self.clock, remaining).await;
        }
    }

    /// Leaves the low-power display mode.
    ///
    /// # Errors
    ///
    /// Same as [`PanelDevice::sleep_out`].
    pub async fn doze_exit(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        if inner.state.bypass {
            self.log_bypassed(&inner, "doze exit");
            return Ok(());
        }
        if inner.state.active == ActiveState::Normal {
            return Ok(());
        }
        self.sleep_out_locked(&mut family, &mut inner).await
    }

    /// Turns the display output on; only meaningful in `NORMAL`/`LPM`.
    ///
    /// # Errors
    ///
    /// Family command failures.
    pub async fn display_on(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;
        self.display_on_locked(&mut family, &mut inner).await
    }

    async fn display_on_locked(
        &self,
        family: &mut F,
        inner: &mut Inner<R>,
    ) -> Result<(), PanelError> {
        if inner.state.bypass {
            self.log_bypassed(inner, "display on");
            return Ok(());
        }
        if !inner.state.active.is_display_active() {
            return Ok(());
        }
        family.display_on_commands().await?;
        inner.state.display_on = true;
        Ok(())
    }

    /// Turns the display output off; only meaningful in `NORMAL`/`LPM`.
    ///
    /// # Errors
    ///
    /// Family command failures.
    pub async fn display_off(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        if inner.state.bypass {
            self.log_bypassed(&inner, "display off");
            return Ok(());
        }
        if !inner.state.active.is_display_active() {
            return Ok(());
        }
        family.display_off_commands().await?;
        inner.state.display_on = false;
        Ok(())
    }

    /// Drives the data lanes to LP-11 through `panel_reset_lp11` while the
    /// panel is powered but asleep.
    ///
    /// # Errors
    ///
    /// Sequence failures other than an absent sequence.
    pub async fn reset_lp11(&self) -> Result<(), PanelError> {
        let mut inner = self.inner.lock().await;

        if inner.state.bypass {
            self.log_bypassed(&inner, "reset lp11");
            return Ok(());
        }
        if inner.state.active != ActiveState::On {
            panel_debug!("{}: reset lp11 ignored in {}", self.name(), inner.state.active);
            return Ok(());
        }
        error::optional(self.run_sequence(&mut inner, names::RESET_LP11).await)
    }

    /// Frame-done notification from the display controller.
    ///
    /// The first frame after a wake turns the display on and arms the
    /// condition check; later frames advance it.
    ///
    /// # Errors
    ///
    /// Display-on command failures.
    pub async fn frame_done(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        let active = inner.state.active;
        if !active.is_display_active() {
            panel_warn!("{}: frame done while {}", self.name(), active);
            return Ok(());
        }
        if inner.state.bypass {
            return Ok(());
        }
        if !inner.state.display_on {
            self.display_on_locked(&mut family, &mut inner).await?;
            self.check.lock(|check| check.borrow_mut().arm(active));
            return Ok(());
        }

        match self.check.lock(|check| check.borrow_mut().on_frame()) {
            FrameVerdict::Dispatch => self.monitors.request(MonitorKind::Condition),
            FrameVerdict::BlackScreen => panel_warn!("{}: screen is black", self.name()),
            FrameVerdict::Idle => {}
        }
        Ok(())
    }

    /// Vertical-sync notification; accepted and ignored.
    pub fn vsync(&self) {
        panel_debug!("{}: vsync", self.name());
    }

    /// Selects a display mode by index.
    ///
    /// The mode is programmed right away in `NORMAL` and on the next wake
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`PanelError::Unsupported`] for families without modes,
    /// [`PanelError::InvalidArgument`] for unknown indices, family command
    /// failures.
    pub async fn set_display_mode(&self, index: u16) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let mut inner = self.inner.lock().await;

        if inner.state.bypass {
            self.log_bypassed(&inner, "display mode");
            return Ok(());
        }

        let mode = family.resolve_display_mode(index)?;
        let previous = inner.pending_mode.or(inner.display_mode);
        if inner.state.active == ActiveState::Normal {
            family.apply_display_mode(mode).await?;
            inner.display_mode = Some(mode);
            inner.pending_mode = None;
        } else {
            inner.pending_mode = Some(mode);
        }

        self.callbacks
            .fire(CallbackId::DisplayMode, StateChange::DisplayMode(mode));
        if previous.map(|previous| previous.refresh_hz) != Some(mode.refresh_hz) {
            self.callbacks
                .fire(CallbackId::RefreshRate, StateChange::RefreshRate(mode.refresh_hz));
        }
        Ok(())
    }

    /// Installs the recovery hooks used by the command-error-flag worker.
    pub fn register_error_callback(&self, callback: &'a dyn ErrorRecovery) {
        self.callbacks.set_error(callback);
    }

    /// Installs a state-change callback in slot `id`, replacing any previous
    /// one. Callbacks run with the state lock held and must not call back
    /// into the device.
    pub fn register_state_change_callback(
        &self,
        id: CallbackId,
        callback: &'a dyn StateChangeCallback,
    ) {
        self.callbacks.set_state(id, callback);
    }

    /// Connector and supply health as seen by the pins right now.
    #[must_use]
    pub fn check_status(&self) -> CheckStatus {
        let abnormal = |id: PinId| matches!(self.sample(id), Ok(Some(PinState::Nok)));
        CheckStatus {
            no_device: abnormal(PinId::ConnDet),
            display_off: abnormal(PinId::DispDet),
        }
    }

    /// Logs the panel state, pin levels and family registers.
    ///
    /// # Errors
    ///
    /// Family dump failures.
    pub async fn debug_dump(&self) -> Result<(), PanelError> {
        let mut family = self.family.lock().await;
        let inner = self.inner.lock().await;
        let state = inner.state;

        panel_info!(
            "{}: {} panel id {} state {} powered {} display {} connector {}",
            self.name(),
            family.name(),
            state.panel_id,
            state.active,
            state.power == PowerState::On,
            state.display_on,
            state.connected
        );
        panel_info!("{}: {}", self.name(), self.report(&inner));
        for id in PinId::ALL {
            if let Ok(Some(pin)) = self.sample(id) {
                panel_info!("{}: {} {}", self.name(), id, pin);
            }
        }
        let records = self.with_telemetry(|recorder| recorder.len());
        panel_info!("{}: {} telemetry records", self.name(), records);

        family.dump().await
    }
}
