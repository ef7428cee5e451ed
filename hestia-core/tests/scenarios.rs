//! End-to-end scenarios: boot, ticks, remote commands and reboots over
//! RAM-backed storage and a manual clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use hestia_core::channels::{GeneralPurposeMeasurement, MeasurementDefaults, Relay, StateOnInit};
use hestia_core::clock::ManualClock;
use hestia_core::storage::{MemoryKv, MemoryMedium};
use hestia_core::traits::{
    MeasurementDriver, NetworkInterface, NetworkMode, ProtocolLayer, RelayOutput, SensorError,
    Uplink,
};
use hestia_core::{
    Action, ConfigStore, DeviceMode, DeviceRuntime, Element, RuntimeConfig, SharedRegistry,
    StateStorage,
};
use hestia_hal::{Clock, SystemControl};
use hestia_protocol::{
    ChannelConfigMessage, ChannelFunction, ChannelValue, ConfigResult, ConfigType,
    MeasurementConfigBlock, NewValue, TimerReport,
};

const GUID: [u8; 16] = [0x11; 16];
const AUTH_KEY: [u8; 16] = [0x22; 16];
const TICK_MS: u64 = 100;

// ---- Collaborators ----

#[derive(Clone, Default)]
struct SharedOutput(Arc<AtomicBool>);

impl RelayOutput for SharedOutput {
    fn set(&mut self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    fn is_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts slow timer ticks
struct TimerCount(Arc<AtomicU32>);

impl Element for TimerCount {
    fn on_timer(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct FixedSensor(f64);

impl MeasurementDriver for FixedSensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        Ok(self.0)
    }
}

#[derive(Clone, Default)]
struct Network {
    ready: Rc<Cell<bool>>,
}

impl NetworkInterface for Network {
    fn setup(&mut self) {}

    fn is_ready(&mut self) -> bool {
        self.ready.get()
    }

    fn set_mode(&mut self, _mode: NetworkMode) {}

    fn uninit(&mut self) {}
}

#[derive(Default)]
struct Session {
    connected: bool,
    registered: bool,
    values: Vec<(u8, ChannelValue)>,
    timers: Vec<TimerReport>,
    configs: Vec<ChannelConfigMessage>,
    notified: Vec<u8>,
}

#[derive(Clone, Default)]
struct Cloud(Rc<RefCell<Session>>);

impl Cloud {
    fn connect(&self) {
        let mut session = self.0.borrow_mut();
        session.connected = true;
        session.registered = true;
    }
}

impl Uplink for Cloud {
    fn send_channel_value(&mut self, channel: u8, value: &ChannelValue) -> bool {
        self.0.borrow_mut().values.push((channel, *value));
        true
    }

    fn send_remaining_time(&mut self, report: &TimerReport) -> bool {
        self.0.borrow_mut().timers.push(*report);
        true
    }

    fn send_channel_config(&mut self, message: &ChannelConfigMessage) -> bool {
        self.0.borrow_mut().configs.push(message.clone());
        true
    }
}

impl ProtocolLayer for Cloud {
    fn on_load_config(&mut self, _config: &mut ConfigStore) -> bool {
        true
    }

    fn is_config_empty(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn verify_config(&mut self) -> bool {
        true
    }

    fn iterate(&mut self, _now_ms: u64) -> bool {
        self.0.borrow().connected
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().connected = false;
    }

    fn notify_config_change(&mut self, channel: u8) {
        self.0.borrow_mut().notified.push(channel);
    }

    fn take_registered_event(&mut self) -> bool {
        core::mem::take(&mut self.0.borrow_mut().registered)
    }
}

struct NoReset;

impl SystemControl for NoReset {
    fn soft_reset(&mut self) {}
}

// ---- Rig ----

struct Device {
    clock: ManualClock,
    kv: MemoryKv,
    medium: MemoryMedium,
    network: Network,
    cloud: Cloud,
    runtime: DeviceRuntime<'static>,
}

impl Device {
    /// Build a device over existing storage; the clock starts at 0
    fn over(kv: MemoryKv, medium: MemoryMedium) -> Self {
        let clock = ManualClock::new(0);
        let network = Network::default();
        let cloud = Cloud::default();
        let elements = Box::leak(Box::new(SharedRegistry::new()));
        let mut runtime = DeviceRuntime::new(
            elements,
            ConfigStore::new(Box::new(kv.clone())),
            StateStorage::new(Box::new(medium.clone())),
            Box::new(clock.clone()),
            Box::new(NoReset),
            RuntimeConfig::default(),
        )
        .with_network(Box::new(network.clone()))
        .with_identity(GUID, AUTH_KEY);
        runtime.add_protocol(Box::new(cloud.clone()));
        Self {
            clock,
            kv,
            medium,
            network,
            cloud,
            runtime,
        }
    }

    fn new() -> Self {
        Self::over(MemoryKv::new(), MemoryMedium::new(256))
    }

    /// Same storage, fresh runtime: a power cycle
    fn reboot(&self) -> Self {
        Self::over(self.kv.clone(), self.medium.clone())
    }

    fn add_relay(&mut self, state_on_init: StateOnInit) -> (u8, SharedOutput) {
        let output = SharedOutput::default();
        let relay = Relay::new(output.clone(), ChannelFunction::PowerSwitch)
            .with_state_on_init(state_on_init);
        let channel = self.runtime.add_element(Box::new(relay)).unwrap();
        (channel, output)
    }

    fn tick(&mut self, count: usize) {
        for _ in 0..count {
            self.clock.advance(TICK_MS);
            self.runtime.iterate();
        }
    }

    /// Tick until `at_ms`
    fn run_until(&mut self, at_ms: u64) {
        while self.clock.millis() < at_ms {
            self.tick(1);
        }
    }
}

// ---- Scenarios ----

#[test]
fn scenario_a_timed_turn_on_expires() {
    let mut device = Device::new();
    let (ch, output) = device.add_relay(StateOnInit::Off);
    device.runtime.begin().unwrap();
    assert!(!output.is_on());

    device.runtime.run_action(ch, Action::TurnOnFor(1000)).unwrap();
    assert!(output.is_on());

    device.tick(9);
    assert!(output.is_on());

    device.tick(6);
    assert!(!output.is_on());
    assert_eq!(
        device.runtime.channel_value(ch).and_then(|v| v.as_bool()),
        Some(false)
    );
}

#[test]
fn scenario_b_remote_off_with_duration_resumes_on() {
    let mut device = Device::new();
    let (ch, output) = device.add_relay(StateOnInit::Off);
    device.runtime.begin().unwrap();
    device.runtime.run_action(ch, Action::TurnOn).unwrap();
    device.tick(5);
    assert!(output.is_on());

    device
        .runtime
        .handle_new_value(&NewValue::level(ch, false, 2000))
        .unwrap();
    assert!(!output.is_on());

    device.tick(22);
    assert!(output.is_on());
    // Steady on: no further countdown
    device.tick(50);
    assert!(output.is_on());
}

#[test]
fn scenario_c_delayed_saves_coalesce() {
    let mut device = Device::new();
    device.runtime.begin().unwrap();
    let baseline = device.kv.commit_count();

    device.runtime.config_store().save_with_delay(2000, 0);
    device.tick(4);
    device.runtime.config_store().save_with_delay(2000, 400);

    let mut committed_at = None;
    while device.clock.millis() < 5000 {
        device.tick(1);
        if committed_at.is_none() && device.kv.commit_count() > baseline {
            committed_at = Some(device.clock.millis());
        }
    }

    assert_eq!(device.kv.commit_count(), baseline + 1);
    let at = committed_at.unwrap();
    assert!(at >= 2000);
    assert!(at - 400 < 2000);
}

#[test]
fn test_unknown_channel_rejected() {
    let mut device = Device::new();
    device.add_relay(StateOnInit::Off);
    device.runtime.begin().unwrap();
    assert!(device
        .runtime
        .handle_new_value(&NewValue::level(5, true, 0))
        .is_err());
}

#[test]
fn test_turn_off_is_idempotent() {
    let mut device = Device::new();
    let (ch, output) = device.add_relay(StateOnInit::Off);
    device.runtime.begin().unwrap();
    device.network.ready.set(true);
    device.cloud.connect();
    device.tick(5);
    let sent = device.cloud.0.borrow().values.len();

    device.runtime.run_action(ch, Action::TurnOff).unwrap();
    device.runtime.run_action(ch, Action::TurnOff).unwrap();
    device.tick(5);
    assert!(!output.is_on());
    assert_eq!(device.cloud.0.borrow().values.len(), sent);
}

// ---- Restart, not merge ----

/// Run `first` at 0 and `second` at 1000, return the output level sampled
/// every 100 ms up to 8000
fn levels_after(first: Action, second: Option<Action>) -> Vec<bool> {
    let mut device = Device::new();
    let (ch, output) = device.add_relay(StateOnInit::Off);
    device.runtime.begin().unwrap();

    if second.is_some() {
        device.runtime.run_action(ch, first).unwrap();
    }
    device.run_until(1000);
    device.runtime.run_action(ch, second.unwrap_or(first)).unwrap();

    let mut levels = vec![output.is_on()];
    while device.clock.millis() < 8000 {
        device.tick(1);
        levels.push(output.is_on());
    }
    levels
}

#[test]
fn test_countdown_restarts_instead_of_merging() {
    use Action::{TurnOffFor, TurnOnFor};

    let combinations = [
        (TurnOnFor(5000), TurnOnFor(1000)),
        (TurnOnFor(5000), TurnOffFor(2000)),
        (TurnOffFor(5000), TurnOnFor(2000)),
        (TurnOffFor(5000), TurnOffFor(1000)),
    ];
    for (prior, next) in combinations {
        // Only the latest command counts
        let merged = levels_after(prior, Some(next));
        let single = levels_after(next, None);
        assert_eq!(merged, single, "{:?} then {:?}", prior, next);
    }
}

// ---- Persisted timer state ----

#[test]
fn test_countdown_resumes_after_reboot() {
    let mut device = Device::new();
    let (ch, output) = device.add_relay(StateOnInit::Restore);
    device.runtime.begin().unwrap();
    device.runtime.run_action(ch, Action::TurnOnFor(10_000)).unwrap();
    device.run_until(2000);
    assert!(output.is_on());

    let mut rebooted = device.reboot();
    let (_, output) = rebooted.add_relay(StateOnInit::Restore);
    rebooted.runtime.begin().unwrap();
    assert!(output.is_on());

    // Remaining time never exceeds the stored duration
    rebooted.run_until(10_000);
    assert!(!output.is_on());
}

#[test]
fn test_steady_on_restores_without_countdown() {
    let mut device = Device::new();
    let (ch, _) = device.add_relay(StateOnInit::Restore);
    device.runtime.begin().unwrap();
    device.runtime.run_action(ch, Action::TurnOn).unwrap();
    device.run_until(2000);

    let mut rebooted = device.reboot();
    let (_, output) = rebooted.add_relay(StateOnInit::Restore);
    rebooted.runtime.begin().unwrap();
    assert!(output.is_on());
    rebooted.run_until(30_000);
    assert!(output.is_on());
}

#[test]
fn test_off_with_countdown_restores_off_then_on() {
    let mut device = Device::new();
    let (ch, output) = device.add_relay(StateOnInit::Restore);
    device.runtime.begin().unwrap();
    device.runtime.run_action(ch, Action::TurnOn).unwrap();
    device.runtime.run_action(ch, Action::TurnOffFor(5000)).unwrap();
    device.run_until(2000);
    assert!(!output.is_on());

    let mut rebooted = device.reboot();
    let (_, output) = rebooted.add_relay(StateOnInit::Restore);
    rebooted.runtime.begin().unwrap();
    assert!(!output.is_on());
    rebooted.run_until(5000);
    assert!(output.is_on());
}

#[test]
fn test_changed_layout_discards_state() {
    let mut device = Device::new();
    let (ch, _) = device.add_relay(StateOnInit::Restore);
    device.runtime.begin().unwrap();
    device.runtime.run_action(ch, Action::TurnOn).unwrap();
    device.run_until(2000);

    // A second relay changes the section size
    let mut rebooted = device.reboot();
    let (_, first) = rebooted.add_relay(StateOnInit::Restore);
    let (_, second) = rebooted.add_relay(StateOnInit::Restore);
    rebooted.runtime.begin().unwrap();
    assert!(!first.is_on());
    assert!(!second.is_on());
}

// ---- Configuration reconciliation ----

fn add_sensor(device: &mut Device) -> u8 {
    let sensor = GeneralPurposeMeasurement::new(FixedSensor(21.5), MeasurementDefaults::default());
    device.runtime.add_element(Box::new(sensor)).unwrap()
}

#[test]
fn test_pending_local_change_sent_after_reboot() {
    let kv = MemoryKv::new();
    {
        let mut store = ConfigStore::new(Box::new(kv.clone()));
        store.init();
        store.set_channel_config_change_flag(0, ConfigType::Default);
        store.commit();
    }

    let mut device = Device::over(kv.clone(), MemoryMedium::new(256));
    let ch = add_sensor(&mut device);
    device.runtime.begin().unwrap();
    assert_eq!(device.runtime.mode(), DeviceMode::Normal);

    device.network.ready.set(true);
    device.cloud.connect();
    device.tick(3);
    {
        let session = device.cloud.0.borrow();
        assert_eq!(session.configs.len(), 1);
        assert_eq!(session.configs[0].channel, ch);
        assert_eq!(session.configs[0].config_type, ConfigType::Default);
        assert!(session.values.iter().any(|(c, _)| *c == ch));
    }

    // Server values are held back while the local change is unacknowledged
    let message = ChannelConfigMessage::new(
        ch,
        ChannelFunction::GeneralPurposeMeasurement.as_i32(),
        ConfigType::Default,
        &MeasurementConfigBlock::default().encode(),
    )
    .unwrap();
    assert_eq!(
        device.runtime.handle_channel_config(&message),
        Ok(ConfigResult::LocalConfigPending)
    );

    device
        .runtime
        .handle_set_channel_config_result(ch, ConfigType::Default, true)
        .unwrap();
    device.tick(25);

    let mut store = ConfigStore::new(Box::new(kv));
    store.init();
    assert!(!store.is_channel_config_change_flag_set(ch, ConfigType::Default));
}

#[test]
fn test_stale_server_defaults_raise_flag() {
    let mut device = Device::new();
    let ch = add_sensor(&mut device);
    device.runtime.begin().unwrap();
    device.network.ready.set(true);
    device.cloud.connect();
    device.tick(2);

    let block = MeasurementConfigBlock {
        value_divider: 10,
        default_value_divider: 99,
        ..Default::default()
    };
    let message = ChannelConfigMessage::new(
        ch,
        ChannelFunction::GeneralPurposeMeasurement.as_i32(),
        ConfigType::Default,
        &block.encode(),
    )
    .unwrap();
    assert_eq!(
        device.runtime.handle_channel_config(&message),
        Ok(ConfigResult::Success)
    );
    assert!(device
        .runtime
        .config_store()
        .is_channel_config_change_flag_set(ch, ConfigType::Default));
    assert_eq!(device.cloud.0.borrow().notified, vec![ch]);

    // The corrected configuration goes out on the next connected ticks
    device.tick(2);
    assert_eq!(device.cloud.0.borrow().configs.len(), 1);
}

#[test]
fn test_server_config_committed_after_delay() {
    let mut device = Device::new();
    let ch = add_sensor(&mut device);
    device.runtime.begin().unwrap();

    let block = MeasurementConfigBlock {
        value_precision: 2,
        refresh_interval_ms: 1000,
        ..Default::default()
    };
    let message = ChannelConfigMessage::new(
        ch,
        ChannelFunction::GeneralPurposeMeasurement.as_i32(),
        ConfigType::Default,
        &block.encode(),
    )
    .unwrap();
    assert_eq!(
        device.runtime.handle_channel_config(&message),
        Ok(ConfigResult::Success)
    );
    assert!(!device.kv.contains("0_gpm_common"));
    device.run_until(3000);
    assert!(device.kv.contains("0_gpm_common"));
}

// ---- Timer callbacks ----

static ELEMENTS: SharedRegistry<CriticalSectionRawMutex> = SharedRegistry::new();

#[test]
fn test_timer_hooks_from_another_thread() {
    let clock = ManualClock::new(0);
    let mut runtime = DeviceRuntime::new(
        &ELEMENTS,
        ConfigStore::new(Box::new(MemoryKv::new())),
        StateStorage::new(Box::new(MemoryMedium::new(256))),
        Box::new(clock.clone()),
        Box::new(NoReset),
        RuntimeConfig::default(),
    )
    .with_network(Box::new(Network::default()))
    .with_identity(GUID, AUTH_KEY);
    runtime.add_protocol(Box::new(Cloud::default()));

    let ticks = Arc::new(AtomicU32::new(0));
    runtime.add_element(Box::new(TimerCount(ticks.clone())));
    let output = SharedOutput::default();
    let relay = Relay::new(output.clone(), ChannelFunction::PowerSwitch);
    let ch = runtime.add_element(Box::new(relay)).unwrap();
    runtime.begin().unwrap();
    runtime.run_action(ch, Action::TurnOnFor(5000)).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..1000 {
                ELEMENTS.on_timer();
            }
        });
        for _ in 0..100 {
            clock.advance(TICK_MS);
            runtime.iterate();
        }
    });

    assert_eq!(ticks.load(Ordering::SeqCst), 1000);
    assert!(!output.is_on());
}
