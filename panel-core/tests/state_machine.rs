mod common;

use std::cell::RefCell;

use common::{Bench, MODES, OWNER, PINS, Registry, run};
use panel_core::PanelError;
use panel_core::bypass::BypassReason;
use panel_core::family::CommandTable;
use panel_core::pins::{PinId, PinLevel, PinState};
use panel_core::registry::{
    CallbackId, PanelNotice, PanelObserver, StateChange, StateChangeCallback,
};
use panel_core::state::{ActiveState, Connection, PowerState};
use panel_core::telemetry::PanelEvent;

#[derive(Default)]
struct Changes(RefCell<Vec<(CallbackId, StateChange)>>);

impl StateChangeCallback for Changes {
    fn on_change(&self, id: CallbackId, change: StateChange) {
        self.0.borrow_mut().push((id, change));
    }
}

#[derive(Default)]
struct Notices(RefCell<Vec<PanelNotice>>);

impl PanelObserver for Notices {
    fn notify(&self, panel: &'static str, notice: PanelNotice) {
        assert_eq!(panel, OWNER);
        self.0.borrow_mut().push(notice);
    }
}

#[test]
fn power_on_without_a_sequence_writes_nothing() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device_with(&bench, &registry, common::config(), PINS, &[]);

    assert_eq!(run(device.power_on()), Ok(()));

    let state = run(device.state());
    assert_eq!(state.active, ActiveState::On);
    assert_eq!(state.power, PowerState::On);
    assert_eq!(bench.hardware_writes(), 0, "absent sequence is not an error");
}

#[test]
fn wake_and_sleep_walk_the_state_machine() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");
    assert!(registry.is_attached(OWNER));

    run(device.power_on()).expect("power on");
    assert_eq!(run(device.state()).active, ActiveState::On);

    run(device.sleep_out()).expect("sleep out");
    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Normal);
    assert_eq!(state.power, PowerState::On);
    assert!(!state.display_on, "display stays off until the first frame");
    assert_eq!(bench.sent(CommandTable::Init), 1);
    assert!(device.with_pins(|bank| bank.is_irq_enabled(PinId::DispDet)));
    assert!(device.with_pins(|bank| bank.is_irq_enabled(PinId::Pcd)));

    run(device.sleep_in()).expect("sleep in");
    assert_eq!(run(device.state()).active, ActiveState::On);
    assert_eq!(bench.sent(CommandTable::Exit), 1);
    assert!(
        !device.with_pins(|bank| bank.is_irq_enabled(PinId::DispDet)),
        "fault interrupts are only live while awake"
    );

    run(device.power_off()).expect("power off");
    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Off);
    assert_eq!(state.power, PowerState::Off);
    assert_eq!(bench.level(PinId::Reset), PinLevel::Low);
}

#[test]
fn power_off_from_normal_sleeps_in_first() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    run(device.sleep_out()).expect("sleep out powers the panel itself");
    run(device.frame_done()).expect("first frame");
    assert!(run(device.state()).display_on);

    run(device.power_off()).expect("power off");
    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Off);
    assert!(!state.display_on);
    assert_eq!(bench.sent(CommandTable::DisplayOff), 1);
    assert_eq!(bench.sent(CommandTable::Exit), 1);
}

#[test]
fn doze_round_trip_restores_normal() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");
    run(device.sleep_out()).expect("sleep out");
    let woke_at = bench.now();

    run(device.doze()).expect("doze");
    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Lpm);
    assert!(
        bench.now() - woke_at >= core::time::Duration::from_millis(34),
        "doze waits out the minimum panel-on time"
    );
    assert_eq!(bench.sent(CommandTable::AlpmEnter), 1);
    assert!(device.with_pins(|bank| bank.is_irq_enabled(PinId::DispDet)));

    run(device.doze_exit()).expect("doze exit");
    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Normal);
    assert!(!state.bypass);
    assert_eq!(bench.sent(CommandTable::AlpmExit), 1);
    assert_eq!(bench.sent(CommandTable::Init), 1, "doze exit skips the full init");
}

#[test]
fn doze_from_off_wakes_the_panel_first() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    run(device.doze()).expect("doze");

    assert_eq!(run(device.state()).active, ActiveState::Lpm);
    assert_eq!(bench.sent(CommandTable::Init), 1);
    assert_eq!(bench.sent(CommandTable::AlpmEnter), 1);
}

#[test]
fn failed_doze_exit_leaves_the_panel_in_lpm() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");
    run(device.sleep_out()).expect("sleep out");
    run(device.doze()).expect("doze");

    bench.set(PinId::DispDet, PinState::Nok);
    let before = bench.now();
    assert_eq!(run(device.sleep_out()), Err(PanelError::Timeout));

    assert_eq!(run(device.state()).active, ActiveState::Lpm);
    assert_eq!(
        bench.now() - before,
        core::time::Duration::from_millis(19),
        "20 polls spaced 1 ms apart"
    );
}

#[test]
fn exhausted_retries_on_a_healthy_panel_are_fatal() {
    let bench = Bench::healthy();
    bench.fail_init(u32::MAX);
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    assert_eq!(run(device.sleep_out()), Err(PanelError::FatalIntegration));

    assert_eq!(bench.sent(CommandTable::Init), 4, "one attempt plus three retries");
    let retries = device.with_telemetry(|recorder| {
        recorder.count(|event| matches!(event, PanelEvent::SleepOutRetry { .. }))
    });
    assert_eq!(retries, 3);
    assert_eq!(run(device.sleep_out_retries()), 3, "budget resets per sleep-out");
    let state = run(device.state());
    assert_eq!(state.active, ActiveState::On);
    assert!(!state.bypass);
}

#[test]
fn power_cycle_retry_recovers_a_flaky_init() {
    let bench = Bench::healthy();
    bench.fail_init(2);
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");
    let before = bench.now();

    run(device.sleep_out()).expect("third attempt succeeds");

    assert_eq!(run(device.state()).active, ActiveState::Normal);
    assert_eq!(bench.sent(CommandTable::Init), 3);
    assert_eq!(run(device.sleep_out_retries()), 3);
    assert!(
        bench.now() - before >= core::time::Duration::from_millis(200),
        "each retry settles after the power cycle"
    );
    let offs = bench
        .pin_writes()
        .iter()
        .filter(|write| **write == (10, PinLevel::Low))
        .count();
    assert_eq!(offs, 2, "one power-off per retry");
}

#[test]
fn exhausted_retries_on_a_cracked_panel_bypass() {
    let bench = Bench::healthy();
    bench.fail_init(u32::MAX);
    bench.set(PinId::Pcd, PinState::Nok);
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    assert_eq!(run(device.sleep_out()), Ok(()));

    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Normal);
    assert!(state.bypass);
    assert!(state.ignore_frame_timing);
    assert_eq!(run(device.bypass_report()).reason, BypassReason::CrackDetected);
}

#[test]
fn abnormal_crack_detect_after_init_keeps_running() {
    let bench = Bench::healthy();
    bench.set(PinId::Pcd, PinState::Nok);
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    run(device.sleep_out()).expect("sleep out");

    let state = run(device.state());
    assert_eq!(state.active, ActiveState::Normal);
    assert!(!state.bypass);
    assert!(run(device.ignores_frame_timing()));
}

#[test]
fn disconnected_connector_bypasses_until_it_returns() {
    let bench = Bench::healthy();
    bench.set(PinId::ConnDet, PinState::Nok);
    let notices = Notices::default();
    let registry = Registry::new();
    registry.subscribe(&notices).expect("subscribe");
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    assert_eq!(run(device.power_on()), Err(PanelError::NotFound));
    let state = run(device.state());
    assert!(state.bypass);
    assert_eq!(state.active, ActiveState::Off);
    assert_eq!(bench.hardware_writes(), 0);
    assert_eq!(
        run(device.bypass_report()).reason,
        BypassReason::ConnectorDisconnected
    );
    assert!(
        notices
            .0
            .borrow()
            .contains(&PanelNotice::Connector(Connection::Disconnected))
    );

    bench.set(PinId::ConnDet, PinState::Ok);
    run(device.power_on()).expect("power on after reconnect");
    let state = run(device.state());
    assert!(!state.bypass);
    assert_eq!(state.active, ActiveState::On);
    assert_eq!(state.connected, Connection::Connected);
}

#[test]
fn display_output_follows_the_active_state() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");
    run(device.power_on()).expect("power on");

    run(device.display_on()).expect("display on while asleep");
    assert!(!run(device.state()).display_on);
    assert_eq!(bench.sent(CommandTable::DisplayOn), 0);

    run(device.sleep_out()).expect("sleep out");
    run(device.display_on()).expect("display on");
    assert!(run(device.state()).display_on);
    run(device.display_off()).expect("display off");
    assert!(!run(device.state()).display_on);
    assert_eq!(bench.sent(CommandTable::DisplayOn), 1);
    assert_eq!(bench.sent(CommandTable::DisplayOff), 1);
}

#[test]
fn reset_lp11_only_runs_while_powered_and_asleep() {
    let bench = Bench::healthy();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    run(device.probe()).expect("probe");

    run(device.reset_lp11()).expect("ignored while off");
    assert!(bench.pin_writes().is_empty());

    run(device.power_on()).expect("power on");
    bench.clear_log();
    run(device.reset_lp11()).expect("reset lp11");
    assert_eq!(
        bench.pin_writes(),
        vec![(10, PinLevel::Low), (10, PinLevel::High)]
    );
}

#[test]
fn display_modes_apply_now_or_at_the_next_wake() {
    let bench = Bench::healthy();
    let changes = Changes::default();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    device.register_state_change_callback(CallbackId::DisplayMode, &changes);
    device.register_state_change_callback(CallbackId::RefreshRate, &changes);
    run(device.probe()).expect("probe");

    run(device.set_display_mode(1)).expect("mode while off");
    assert_eq!(run(device.display_mode()), None, "deferred until wake");
    assert_eq!(bench.sent(CommandTable::DisplayMode(1)), 0);

    run(device.sleep_out()).expect("sleep out");
    assert_eq!(run(device.display_mode()), Some(MODES[1]));
    assert_eq!(bench.sent(CommandTable::DisplayMode(1)), 1);

    run(device.set_display_mode(2)).expect("mode while awake");
    assert_eq!(run(device.display_mode()), Some(MODES[2]));
    assert_eq!(
        run(device.set_display_mode(9)),
        Err(PanelError::InvalidArgument)
    );

    assert_eq!(
        *changes.0.borrow(),
        vec![
            (CallbackId::DisplayMode, StateChange::DisplayMode(MODES[1])),
            (CallbackId::RefreshRate, StateChange::RefreshRate(120)),
            (CallbackId::DisplayMode, StateChange::DisplayMode(MODES[2])),
        ],
        "same refresh rate does not fire the refresh callback again"
    );
}

#[test]
fn deferred_modes_with_the_same_rate_fire_the_rate_callback_once() {
    let bench = Bench::healthy();
    let changes = Changes::default();
    let registry = Registry::new();
    let device = common::device(&bench, &registry);
    device.register_state_change_callback(CallbackId::RefreshRate, &changes);
    run(device.probe()).expect("probe");

    run(device.set_display_mode(1)).expect("first mode while off");
    run(device.set_display_mode(2)).expect("second mode while off");

    assert_eq!(MODES[1].refresh_hz, MODES[2].refresh_hz);
    assert_eq!(
        *changes.0.borrow(),
        vec![(CallbackId::RefreshRate, StateChange::RefreshRate(120))]
    );
    run(device.sleep_out()).expect("sleep out");
    assert_eq!(run(device.display_mode()), Some(MODES[2]));
}

#[test]
fn transitions_reach_callbacks_observers_and_telemetry() {
    let bench = Bench::healthy();
    let changes = Changes::default();
    let notices = Notices::default();
    let registry = Registry::new();
    registry.subscribe(&notices).expect("subscribe");
    let device = common::device(&bench, &registry);
    device.register_state_change_callback(CallbackId::State, &changes);
    run(device.probe()).expect("probe");

    run(device.sleep_out()).expect("sleep out");
    run(device.power_off()).expect("power off");

    let expected = [ActiveState::On, ActiveState::Normal, ActiveState::On, ActiveState::Off];
    let seen: Vec<_> = changes.0.borrow().iter().map(|(_, change)| *change).collect();
    assert_eq!(seen, expected.map(StateChange::Active).to_vec());

    let observed = notices
        .0
        .borrow()
        .iter()
        .filter(|notice| matches!(notice, PanelNotice::StateChanged { .. }))
        .count();
    assert_eq!(observed, expected.len());

    let transitions = device.with_telemetry(|recorder| {
        recorder.count(|event| matches!(event, PanelEvent::StateChanged { .. }))
    });
    assert_eq!(transitions, expected.len());
    let failures = device.with_telemetry(|recorder| {
        recorder.count(|event| matches!(event, PanelEvent::SequenceFailed { .. }))
    });
    assert_eq!(failures, 0);
}
