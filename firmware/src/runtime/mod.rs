//! Embassy runtime: interrupt-side edge capture and the control tick task.

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_stm32::exti::ExtiInput;
use embassy_time::Timer;
use static_cell::StaticCell;

use tracker_core::cycle::{CycleConfig, Orchestrator};
use tracker_core::motion::{SenseCell, SensorId};
use tracker_core::profiles::ProfileId;

use crate::diaglog::DiagSink;
use crate::hw;
use crate::instant::FirmwareInstant;
use crate::link::at::AtBus;
use crate::link::{GnssAt, ModemAt, ModemClock, SessionAt};

use defmt_rtt as _;

#[global_allocator]
static HEAP: embedded_alloc::LlffHeap = embedded_alloc::LlffHeap::empty();

const HEAP_SIZE: usize = 16 * 1024;

/// Tick cadence of the control loop; every step deadline is far coarser.
const TICK_INTERVAL_MS: u64 = 50;

const MQTT_BROKER: &str = "mqtt.example.local:1883";
const MQTT_CLIENT_ID: &str = "vantrack";

/// Interrupt-to-tick handoff cell; the PIR tasks are the only producers.
static SENSE: SenseCell = SenseCell::new();

static AT_BUS: StaticCell<RefCell<AtBus<'static>>> = StaticCell::new();

type FirmwareOrchestrator = Orchestrator<
    'static,
    FirmwareInstant,
    GnssAt<'static, 'static>,
    ModemAt<'static, 'static>,
    SessionAt<'static, 'static>,
    ModemClock<'static, 'static>,
>;

#[embassy_executor::task]
async fn pir_front_task(mut pin: ExtiInput<'static>) -> ! {
    loop {
        pin.wait_for_rising_edge().await;
        SENSE.record(SensorId::Front);
    }
}

#[embassy_executor::task]
async fn pir_back_task(mut pin: ExtiInput<'static>) -> ! {
    loop {
        pin.wait_for_rising_edge().await;
        SENSE.record(SensorId::Back);
    }
}

#[embassy_executor::task]
async fn control_task(mut orchestrator: FirmwareOrchestrator) -> ! {
    let mut sink = DiagSink::new();
    loop {
        orchestrator.tick(FirmwareInstant::now());
        sink.drain(orchestrator.diag());
        Timer::after_millis(TICK_INTERVAL_MS).await;
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    {
        use core::mem::MaybeUninit;
        static HEAP_MEM: StaticCell<[MaybeUninit<u8>; HEAP_SIZE]> = StaticCell::new();
        let heap_mem = HEAP_MEM.init([const { MaybeUninit::uninit() }; HEAP_SIZE]);
        unsafe { HEAP.init(heap_mem.as_ptr() as usize, HEAP_SIZE) }
    }

    let board = hw::init();
    defmt::info!("boot: vantrack firmware");

    // The antenna rail stays powered; the orchestrator arbitrates which
    // subsystem may drive the shared path.
    core::mem::forget(board.gnss_antenna_rail);

    let bus = AT_BUS.init(RefCell::new(AtBus::new(board.modem_uart)));

    let orchestrator = Orchestrator::new(
        GnssAt::new(bus),
        ModemAt::new(bus),
        SessionAt::new(bus, MQTT_BROKER, MQTT_CLIENT_ID),
        ModemClock::new(bus),
        &SENSE,
        ProfileId::Parked,
        CycleConfig::default(),
        FirmwareInstant::now(),
    );

    spawner.must_spawn(pir_front_task(board.pir_front));
    spawner.must_spawn(pir_back_task(board.pir_back));
    spawner.must_spawn(control_task(orchestrator));
}
