use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use panel_core::family::OledFamily;
use panel_core::monitor::MonitorKind;
use panel_core::pins::{PinBank, PinId};
use panel_core::power::{PowerControl, RegulatorBank};
use panel_core::registry::{CheckStatus, ErrorRecovery, PanelNotice, PanelObserver, PanelRegistry};
use panel_core::{PanelDevice, PanelError};
use static_cell::StaticCell;

use crate::board;
use crate::hw::{BoardPins, EmbassyClock, LevelMirror, LoadSwitches, SpiLink};

type Registry = PanelRegistry<'static, CriticalSectionRawMutex>;
type Device = PanelDevice<
    'static,
    CriticalSectionRawMutex,
    BoardPins,
    LoadSwitches,
    EmbassyClock,
    OledFamily<SpiLink>,
>;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

static LEVELS: LevelMirror = LevelMirror::new();
static REGISTRY: StaticCell<Registry> = StaticCell::new();
static DEVICE: StaticCell<Device> = StaticCell::new();
static NOTICES: NoticeLog = NoticeLog;
static RECOVERY: RecoveryRequests = RecoveryRequests::new();

#[derive(Copy, Clone, defmt::Format)]
enum Recovery {
    Reinit,
    PowerCycle,
}

/// Error-flag callbacks run under the panel locks, so they only queue the
/// work for the main loop.
struct RecoveryRequests {
    pending: Signal<CriticalSectionRawMutex, Recovery>,
}

impl RecoveryRequests {
    const fn new() -> Self {
        Self {
            pending: Signal::new(),
        }
    }

    fn request(&self, recovery: Recovery, status: CheckStatus) -> Result<(), PanelError> {
        if status.no_device {
            return Err(PanelError::NotFound);
        }
        self.pending.signal(recovery);
        Ok(())
    }
}

impl ErrorRecovery for RecoveryRequests {
    fn recover(&self, status: CheckStatus) -> Result<(), PanelError> {
        self.request(Recovery::Reinit, status)
    }

    fn power_down(&self, status: CheckStatus) -> Result<(), PanelError> {
        self.request(Recovery::PowerCycle, status)
    }
}

struct NoticeLog;

impl PanelObserver for NoticeLog {
    fn notify(&self, panel: &'static str, notice: PanelNotice) {
        defmt::info!("{}: {}", panel, notice);
    }
}

#[embassy_executor::task(pool_size = 5)]
async fn monitor(device: &'static Device, kind: MonitorKind) {
    device.run_monitor(kind).await;
}

#[embassy_executor::task(pool_size = 4)]
async fn edges(
    device: &'static Device,
    pin: PinId,
    number: u32,
    mut input: ExtiInput<'static>,
) {
    loop {
        input.wait_for_any_edge().await;
        LEVELS.store(number, input.is_high());
        device.irq_fired(pin);
    }
}

async fn wake(device: &Device) {
    match device.sleep_out().await {
        Ok(()) => {}
        Err(PanelError::FatalIntegration) => {
            defmt::error!("panel never initialized; check the flex cable");
        }
        Err(err) => defmt::warn!("panel sleep out failed: {}", err),
    }
}

async fn recover(device: &Device, recovery: Recovery) {
    defmt::warn!("panel recovery: {}", recovery);
    let result = match recovery {
        Recovery::Reinit => device.sleep_in().await,
        Recovery::PowerCycle => device.power_off().await,
    };
    if let Err(err) = result {
        defmt::warn!("panel recovery failed: {}", err);
        return;
    }
    wake(device).await;
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PA3,
        PA4,
        PA5,
        PA6,
        PA7,
        PA8,
        PA9,
        PA10,
        PB3,
        PB4,
        PB5,
        PB6,
        SPI1,
        EXTI3,
        EXTI4,
        EXTI5,
        EXTI6,
        ..
    } = hal::init(hal::Config::default());

    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(8_000_000);
    let link = SpiLink::new(
        Spi::new_blocking(SPI1, PA5, PA7, PA6, spi_config),
        Output::new(PA4, Level::High, Speed::VeryHigh),
        Output::new(PA3, Level::Low, Speed::VeryHigh),
    );

    let inputs = [
        ExtiInput::new(PB3, EXTI3, Pull::Up),
        ExtiInput::new(PB4, EXTI4, Pull::Up),
        ExtiInput::new(PB5, EXTI5, Pull::Up),
        ExtiInput::new(PB6, EXTI6, Pull::Up),
    ];
    for ((_, number), input) in board::MONITORED.iter().zip(&inputs) {
        LEVELS.store(*number, input.is_high());
    }

    let pins = PinBank::from_specs(
        BoardPins::new(Output::new(PA8, Level::Low, Speed::Low), &LEVELS),
        board::PINS,
    )
    .expect("panel pin table");
    let rails = RegulatorBank::from_names(
        LoadSwitches::new(
            Output::new(PA9, Level::Low, Speed::Low),
            Output::new(PA10, Level::Low, Speed::Low),
        ),
        board::RAILS,
    )
    .expect("panel rail table");
    let power =
        PowerControl::from_specs(board::SEQUENCES, &pins, rails).expect("panel sequence table");

    let registry: &'static Registry = REGISTRY.init(PanelRegistry::new());
    registry
        .subscribe(&NOTICES)
        .expect("panel observer registration");
    let device: &'static Device = DEVICE.init(PanelDevice::new(
        board::panel_config(),
        registry,
        pins,
        power,
        EmbassyClock,
        OledFamily::new(link, board::MODES),
    ));
    device.register_error_callback(&RECOVERY);

    for kind in MonitorKind::ALL {
        spawner
            .spawn(monitor(device, kind))
            .expect("failed to spawn panel monitor task");
    }
    for ((pin, number), input) in board::MONITORED.into_iter().zip(inputs) {
        spawner
            .spawn(edges(device, pin, number, input))
            .expect("failed to spawn panel edge task");
    }

    if let Err(err) = device.probe().await {
        defmt::error!("panel probe failed: {}", err);
    }
    defmt::info!("{}", device.bypass_report().await);
    wake(device).await;

    let mut ticker = Ticker::every(Duration::from_micros(board::FRAME_PERIOD_US));
    loop {
        match select(ticker.next(), RECOVERY.pending.wait()).await {
            Either::First(()) => {
                device.vsync();
                if let Err(err) = device.frame_done().await {
                    defmt::warn!("panel frame done failed: {}", err);
                }
            }
            Either::Second(recovery) => recover(device, recovery).await,
        }
    }
}
