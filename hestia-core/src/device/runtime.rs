//! The device runtime
//!
//! [`DeviceRuntime`] is the single owner of all device state. The platform
//! calls [`DeviceRuntime::begin`] once, then [`DeviceRuntime::iterate`] from
//! its main loop, and the timer hooks from its timer callbacks.
//!
//! The elements live in a [`SharedRegistry`] the runtime borrows. Timer
//! callbacks call [`SharedRegistry::on_timer`] directly, from any context;
//! the main loop takes the same lock for every element hook.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::{NoopRawMutex, RawMutex};
use hestia_hal::{Clock, SystemControl};
use hestia_protocol::{
    ChannelConfigMessage, ChannelValue, ConfigResult, ConfigType, NewValue, TimerReport,
};

use super::actions::{ActionQueue, LocalAction, FACTORY_RESET_GUARD_MS};
use super::mode::{DeviceMode, InitialMode, ModeEvent};
use super::status::{DeviceStatus, StatusLog};
use super::supervisor::{Supervisor, Verdict};
use super::{BootError, RuntimeConfig};
use crate::element::{Action, CommandError, Context, Cursor, Element, Registry, SharedRegistry};
use crate::reconcile::ConfigOrigin;
use crate::storage::{ConfigStore, StateStorage, IDENTITY_SIZE};
use crate::traits::{
    LocalWebServer, NetworkInterface, NetworkMode, ProtocolLayer, SwUpdate, UpdaterFactory, Uplink,
};

/// Spacing of network polls while the network is down
pub const NETWORK_RETRY_MS: u64 = 100;

/// Failed polls before the network is reported disconnected (~20 s)
const NETWORK_DISCONNECTED_POLLS: u32 = 200;

/// Failed polls between network restarts (~60 s)
const NETWORK_RESTART_POLLS: u32 = 600;

/// Failed polls per second of connection failure
const POLLS_PER_SECOND: u32 = (1000 / NETWORK_RETRY_MS) as u32;

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    /// Boot failed; inert until externally corrected
    Failed(BootError),
    /// Soft restart issued; inert
    Restarted,
}

/// Sends to every connected protocol layer
struct Fanout<'a> {
    layers: &'a mut [Box<dyn ProtocolLayer>],
    connected: &'a [bool],
}

impl Fanout<'_> {
    fn each(&mut self, mut send: impl FnMut(&mut dyn ProtocolLayer) -> bool) -> bool {
        let mut sent = false;
        for (layer, connected) in self.layers.iter_mut().zip(self.connected) {
            if *connected {
                sent |= send(layer.as_mut());
            }
        }
        sent
    }
}

impl Uplink for Fanout<'_> {
    fn send_channel_value(&mut self, channel: u8, value: &ChannelValue) -> bool {
        self.each(|layer| layer.send_channel_value(channel, value))
    }

    fn send_remaining_time(&mut self, report: &TimerReport) -> bool {
        self.each(|layer| layer.send_remaining_time(report))
    }

    fn send_channel_config(&mut self, message: &ChannelConfigMessage) -> bool {
        self.each(|layer| layer.send_channel_config(message))
    }
}

fn disconnect_all(protocols: &mut [Box<dyn ProtocolLayer>]) {
    for layer in protocols.iter_mut() {
        layer.disconnect();
    }
}

fn is_blank(identity: &[u8; IDENTITY_SIZE]) -> bool {
    identity.iter().all(|b| *b == 0)
}

/// Device runtime
///
/// Generic over the raw mutex guarding the element registry:
/// [`NoopRawMutex`] when timer hooks run from the main loop,
/// `CriticalSectionRawMutex` when they run from an interrupt or thread.
pub struct DeviceRuntime<'r, M: RawMutex = NoopRawMutex> {
    registry: &'r SharedRegistry<M>,
    config: ConfigStore,
    state: StateStorage,
    protocols: Vec<Box<dyn ProtocolLayer>>,
    /// Per-layer result of the last `iterate`
    connected: Vec<bool>,
    network: Option<Box<dyn NetworkInterface>>,
    web_server: Option<Box<dyn LocalWebServer>>,
    updater_factory: Option<Box<dyn UpdaterFactory>>,
    updater: Option<Box<dyn SwUpdate>>,
    clock: Box<dyn Clock>,
    system: Box<dyn SystemControl>,
    settings: RuntimeConfig,

    phase: Phase,
    mode: DeviceMode,
    status: StatusLog,
    supervisor: Supervisor,
    actions: ActionQueue,
    cursor: Cursor,
    config_changes: Vec<u8>,

    name: String,
    guid: [u8; IDENTITY_SIZE],
    auth_key: [u8; IDENTITY_SIZE],

    config_incomplete: bool,
    config_empty: bool,
    factory_reset_pending: bool,

    network_setup_needed: bool,
    network_restart_requested: bool,
    network_ok: bool,
    network_not_ready_polls: u32,
    network_retry_at: Option<u64>,
    session_up: bool,
}

impl<'r, M: RawMutex> DeviceRuntime<'r, M> {
    /// Create a runtime over its element registry, storage and platform
    pub fn new(
        registry: &'r SharedRegistry<M>,
        config: ConfigStore,
        state: StateStorage,
        clock: Box<dyn Clock>,
        system: Box<dyn SystemControl>,
        settings: RuntimeConfig,
    ) -> Self {
        let supervisor = Supervisor::new(
            settings.config_mode_timeout_ms,
            settings.connection_fail_reset_s,
        );
        Self {
            registry,
            config,
            state,
            protocols: Vec::new(),
            connected: Vec::new(),
            network: None,
            web_server: None,
            updater_factory: None,
            updater: None,
            clock,
            system,
            name: String::from(settings.device_name.as_str()),
            settings,
            phase: Phase::Uninitialized,
            mode: DeviceMode::NotSet,
            status: StatusLog::new(),
            supervisor,
            actions: ActionQueue::new(),
            cursor: Cursor::default(),
            config_changes: Vec::new(),
            guid: [0; IDENTITY_SIZE],
            auth_key: [0; IDENTITY_SIZE],
            config_incomplete: false,
            config_empty: true,
            factory_reset_pending: false,
            network_setup_needed: false,
            network_restart_requested: false,
            network_ok: false,
            network_not_ready_polls: 0,
            network_retry_at: None,
            session_up: false,
        }
    }

    pub fn with_network(mut self, network: Box<dyn NetworkInterface>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_web_server(mut self, web_server: Box<dyn LocalWebServer>) -> Self {
        self.web_server = Some(web_server);
        self
    }

    pub fn with_updater_factory(mut self, factory: Box<dyn UpdaterFactory>) -> Self {
        self.updater_factory = Some(factory);
        self
    }

    /// Identity used when the config store has none
    pub fn with_identity(
        mut self,
        guid: [u8; IDENTITY_SIZE],
        auth_key: [u8; IDENTITY_SIZE],
    ) -> Self {
        self.guid = guid;
        self.auth_key = auth_key;
        self
    }

    pub fn add_protocol(&mut self, layer: Box<dyn ProtocolLayer>) {
        self.protocols.push(layer);
        self.connected.push(false);
    }

    /// Register an element; returns its channel number
    pub fn add_element(&mut self, element: Box<dyn Element>) -> Option<u8> {
        self.registry.lock(|registry| registry.add(element)).flatten()
    }

    /// The registry shared with timer callbacks
    pub fn registry(&self) -> &'r SharedRegistry<M> {
        self.registry
    }

    // ---- Accessors ----

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.current()
    }

    pub fn status_log(&self) -> &StatusLog {
        &self.status
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &RuntimeConfig {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Why `begin()` failed, if it did
    pub fn boot_error(&self) -> Option<BootError> {
        match self.phase {
            Phase::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Whether a soft restart has been issued
    pub fn has_restarted(&self) -> bool {
        self.phase == Phase::Restarted
    }

    pub fn is_config_incomplete(&self) -> bool {
        self.config_incomplete
    }

    pub fn config_store(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn state_storage(&mut self) -> &mut StateStorage {
        &mut self.state
    }

    /// Current value of a channel
    pub fn channel_value(&mut self, channel: u8) -> Option<ChannelValue> {
        self.registry
            .lock(|registry| {
                registry
                    .find_mut(channel)
                    .and_then(|element| element.channel().map(|c| *c.value()))
            })
            .flatten()
    }

    /// Run `f` on the element owning `channel`
    pub fn with_element<R>(
        &mut self,
        channel: u8,
        f: impl FnOnce(&mut dyn Element, &mut Context<'_>) -> R,
    ) -> Option<R> {
        let now_ms = self.clock.millis();
        let result = self.with_elements(now_ms, |registry, ctx| {
            registry.find_mut(channel).map(|element| f(element, ctx))
        });
        self.forward_config_changes();
        result.flatten()
    }

    /// Run `f` over the locked registry; `None` if it is already borrowed
    fn with_elements<R>(
        &mut self,
        now_ms: u64,
        f: impl FnOnce(&mut Registry, &mut Context<'_>) -> R,
    ) -> Option<R> {
        let mut ctx = Context::new(
            &mut self.config,
            &mut self.state,
            now_ms,
            &mut self.config_changes,
        );
        self.registry.lock(|registry| f(registry, &mut ctx))
    }

    fn set_status(&mut self, status: DeviceStatus) {
        self.status.set(status, false);
    }

    fn fail(&mut self, error: BootError) -> Result<(), BootError> {
        self.status.set(error.into(), false);
        self.phase = Phase::Failed(error);
        Err(error)
    }

    // ---- Boot ----

    /// Bring the device up
    ///
    /// Runs once; a second call fails with
    /// [`BootError::AlreadyInitialized`]. On error the runtime stays inert.
    pub fn begin(&mut self) -> Result<(), BootError> {
        if self.phase != Phase::Uninitialized {
            self.set_status(DeviceStatus::AlreadyInitialized);
            return Err(BootError::AlreadyInitialized);
        }
        let now_ms = self.clock.millis();
        info!("Starting initialization");

        self.config.init();
        self.state.init();
        self.state.set_save_period(self.settings.state_save_period_ms);

        if self.config.is_available() {
            info!("Loading configuration");
            if !self.load_device_config() {
                self.config_incomplete = true;
            }

            let mut any_enabled = false;
            for layer in self.protocols.iter_mut() {
                if !layer.on_load_config(&mut self.config) && self.mode != DeviceMode::Test {
                    self.config_incomplete = true;
                }
                if !layer.is_config_empty() {
                    self.config_empty = false;
                }
                any_enabled |= layer.is_enabled();
            }
            if !any_enabled {
                self.set_status(DeviceStatus::AllProtocolsDisabled);
                if self.mode != DeviceMode::Test {
                    return self.fail(BootError::AllProtocolsDisabled);
                }
            }

            self.with_elements(now_ms, |registry, ctx| {
                registry.for_each(|element| element.on_load_config(ctx));
            });
        }

        if self.state.is_available() {
            self.load_state(now_ms);
        }

        info!("Initializing elements");
        self.with_elements(now_ms, |registry, ctx| {
            registry.for_each(|element| element.on_init(ctx));
        });
        self.registry.lock(|registry| registry.set_timers_enabled(true));

        if self.network.is_none() {
            return self.fail(BootError::MissingNetworkInterface);
        }
        if is_blank(&self.guid) {
            return self.fail(BootError::InvalidGuid);
        }
        if is_blank(&self.auth_key) {
            return self.fail(BootError::InvalidAuthKey);
        }

        let mut verified = true;
        for layer in self.protocols.iter_mut() {
            verified &= layer.verify_config();
        }
        if !verified && !self.config.is_available() {
            return self.fail(BootError::ConfigVerificationFailed);
        }

        info!("Device name: {}", self.name.as_str());
        info!("Software version: {}", self.settings.sw_version.as_str());

        for layer in self.protocols.iter_mut() {
            layer.on_init();
        }

        self.phase = Phase::Running;
        self.set_status(DeviceStatus::Initialized);
        self.setup_device_mode(now_ms);
        self.forward_config_changes();
        info!("Initialization done");
        Ok(())
    }

    /// Load identity, mode and network settings
    ///
    /// Returns `false` when the configuration is incomplete.
    fn load_device_config(&mut self) -> bool {
        if let Some(name) = self.config.device_name().filter(|n| !n.is_empty()) {
            self.name = name;
        }
        if let Some(guid) = self.config.guid() {
            self.guid = guid;
        }
        if let Some(auth_key) = self.config.auth_key() {
            self.auth_key = auth_key;
        }

        self.mode = self.config.device_mode().unwrap_or(DeviceMode::NotSet);
        debug!("Stored device mode: {:?}", self.mode);

        match self.network.as_mut() {
            Some(network) => {
                let complete = network.load_config(&mut self.config);
                if !complete {
                    info!("Config incomplete: network settings missing");
                }
                complete
            }
            None => true,
        }
    }

    /// Validate the stored state layout, then restore it
    ///
    /// A dry-run save measures what the current elements would write; a
    /// size mismatch means the registered elements changed and the stored
    /// state is discarded.
    fn load_state(&mut self, now_ms: u64) {
        if !self.state.is_valid() {
            return;
        }
        self.state.prepare_save(true);
        self.with_elements(now_ms, |registry, ctx| {
            registry.for_each(|element| element.on_save_state(ctx));
        });
        if !self.state.finish_save() {
            return;
        }
        if self.state.prepare_load() {
            info!("Restoring state");
            self.with_elements(now_ms, |registry, ctx| {
                registry.for_each(|element| element.on_load_state(ctx));
            });
            self.state.finish_load();
        }
    }

    /// Resolve the operating mode and enter it
    fn setup_device_mode(&mut self, now_ms: u64) {
        let event = if self.config_incomplete {
            ModeEvent::ConfigIncomplete
        } else {
            ModeEvent::ConfigComplete
        };
        self.mode = self.mode.transition(event);
        if self.settings.initial_mode == InitialMode::Offline && self.config_empty {
            self.mode = self.mode.transition(ModeEvent::NoConfigOffline);
        }

        match self.mode {
            DeviceMode::Offline => {
                info!("Network disabled, offline mode");
                self.set_status(DeviceStatus::OfflineMode);
            }
            DeviceMode::Config => self.enter_config_mode(now_ms, false),
            _ => {
                info!("Enter normal mode");
                if let Some(network) = self.network.as_mut() {
                    network.set_mode(NetworkMode::Normal);
                }
                self.network_setup_needed = true;
            }
        }
    }

    fn enter_config_mode(&mut self, now_ms: u64, requested: bool) {
        let mode = self.mode.transition(ModeEvent::EnterConfig);
        if mode != DeviceMode::Config {
            warn!("Config mode refused in {:?}", self.mode);
            return;
        }
        self.mode = mode;
        self.supervisor.config_mode_entered(now_ms, requested);
        disconnect_all(&mut self.protocols);
        self.session_up = false;
        if let Some(network) = self.network.as_mut() {
            network.set_mode(NetworkMode::Config);
        }
        self.network_setup_needed = true;
        if let Some(web_server) = self.web_server.as_mut() {
            web_server.start();
        }
        self.status.set(DeviceStatus::ConfigMode, true);
    }

    // ---- Main loop ----

    /// Run one tick
    ///
    /// Never blocks. Does nothing before a successful `begin()` or after a
    /// soft restart.
    pub fn iterate(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let now_ms = self.clock.millis();

        self.config.save_if_needed(now_ms);

        if !self.supervise(now_ms) {
            return;
        }
        self.handle_local_actions(now_ms);
        if self.phase != Phase::Running {
            return;
        }
        self.iterate_always(now_ms);

        if self.supervisor.is_restart_pending() {
            return;
        }
        if let Some(at) = self.network_retry_at {
            if now_ms < at {
                return;
            }
            self.network_retry_at = None;
        }
        if !self.mode.uses_network() {
            return;
        }

        if !self.iterate_network_setup(now_ms) {
            if self.network_ok {
                disconnect_all(&mut self.protocols);
                self.session_up = false;
            }
            self.network_ok = false;
            return;
        }
        self.network_ok = true;

        if self.mode == DeviceMode::SwUpdate {
            self.iterate_sw_update(now_ms);
        } else if self.mode.runs_protocols() {
            self.iterate_protocols(now_ms);
        }
        self.forward_config_changes();
    }

    /// Returns `false` when the device restarted
    fn supervise(&mut self, now_ms: u64) -> bool {
        let fail_s = self.connection_fail_s();
        match self.supervisor.check(now_ms, fail_s) {
            Verdict::Ok => true,
            Verdict::SoftRestart(cause) => {
                info!("Restart: {:?}", cause);
                self.soft_restart();
                false
            }
            Verdict::RestartProtocols => {
                info!("Restarting connections");
                disconnect_all(&mut self.protocols);
                self.session_up = false;
                true
            }
        }
    }

    /// Longest time any link has been failing
    fn connection_fail_s(&self) -> u32 {
        let network_s = self.network_not_ready_polls / POLLS_PER_SECOND;
        self.protocols
            .iter()
            .map(|layer| layer.connection_fail_time_s())
            .fold(network_s, u32::max)
    }

    fn iterate_always(&mut self, now_ms: u64) {
        self.with_elements(now_ms, |registry, ctx| {
            registry.for_each(|element| element.iterate_always(ctx));
        });
        if self.state.save_state_allowed(now_ms) {
            self.save_state(now_ms);
        }
        self.forward_config_changes();
    }

    fn save_state(&mut self, now_ms: u64) {
        if self.factory_reset_pending || !self.state.is_available() {
            return;
        }
        self.state.prepare_save(false);
        self.with_elements(now_ms, |registry, ctx| {
            registry.for_each(|element| element.on_save_state(ctx));
        });
        self.state.finish_save();
    }

    /// Bring the network up; returns whether it is usable
    fn iterate_network_setup(&mut self, now_ms: u64) -> bool {
        let Some(network) = self.network.as_mut() else {
            return false;
        };
        if core::mem::take(&mut self.network_setup_needed) {
            network.setup();
        }
        if self.mode == DeviceMode::Config {
            return true;
        }

        if core::mem::take(&mut self.network_restart_requested) {
            warn!("Network restart requested");
            disconnect_all(&mut self.protocols);
            self.session_up = false;
            network.setup();
        }

        if !network.is_ready() {
            self.network_not_ready_polls += 1;
            if self.network_not_ready_polls == NETWORK_DISCONNECTED_POLLS {
                self.status.set(DeviceStatus::NetworkDisconnected, false);
            }
            if self.network_not_ready_polls % NETWORK_RESTART_POLLS == 0 {
                self.network_restart_requested = true;
            }
            if self.network_not_ready_polls % POLLS_PER_SECOND == 0 {
                trace!(
                    "Network not ready ({} s)",
                    self.network_not_ready_polls / POLLS_PER_SECOND
                );
            }
            self.network_retry_at = Some(now_ms + NETWORK_RETRY_MS);
            return false;
        }

        self.network_not_ready_polls = 0;
        network.iterate();
        true
    }

    fn iterate_protocols(&mut self, now_ms: u64) {
        let mut any_connected = false;
        let mut registered = false;
        for (layer, connected) in self.protocols.iter_mut().zip(self.connected.iter_mut()) {
            *connected = layer.iterate(now_ms);
            any_connected |= *connected;
            if layer.is_network_restart_requested() {
                self.network_restart_requested = true;
            }
            registered |= layer.take_registered_event();
        }

        if registered {
            self.with_elements(now_ms, |registry, ctx| {
                registry.for_each(|element| element.on_registered(ctx));
            });
            self.set_status(DeviceStatus::RegisteredAndReady);
        } else if !any_connected {
            if self.session_up {
                self.set_status(DeviceStatus::ProtocolDisconnected);
            } else if self.status.current() != DeviceStatus::ProtocolDisconnected {
                self.set_status(DeviceStatus::RegisterInProgress);
            }
        }
        self.session_up = any_connected;

        if !any_connected {
            return;
        }
        let mut ctx = Context::new(
            &mut self.config,
            &mut self.state,
            now_ms,
            &mut self.config_changes,
        );
        let mut uplink = Fanout {
            layers: &mut self.protocols[..],
            connected: &self.connected,
        };
        let cursor = &mut self.cursor;
        self.registry
            .lock(|registry| registry.iterate_connected(cursor, &mut ctx, &mut uplink));
    }

    fn create_updater(&mut self) -> Option<Box<dyn SwUpdate>> {
        let factory = self.updater_factory.as_mut()?;
        let url = self
            .config
            .sw_update_url()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| String::from(self.settings.sw_update_url.as_str()));
        let beta = self.config.is_sw_update_beta();
        info!("Firmware update from {}", url.as_str());
        factory.create(&url, beta)
    }

    /// One step of the firmware update
    fn iterate_sw_update(&mut self, now_ms: u64) {
        if self.updater.is_none() {
            self.updater = self.create_updater();
            if self.updater.is_none() {
                warn!("No updater available");
                self.set_status(DeviceStatus::SwUpdateFailed);
                self.finish_sw_update();
                return;
            }
        }
        let Some(updater) = self.updater.as_mut() else {
            return;
        };

        if !updater.is_started() {
            info!("Starting firmware update");
            self.status.set(DeviceStatus::SwDownload, false);
            disconnect_all(&mut self.protocols);
            self.session_up = false;
            updater.start();
            return;
        }

        updater.iterate();
        if updater.is_aborted() {
            warn!("Firmware update aborted");
            self.updater = None;
            self.set_status(DeviceStatus::SwUpdateFailed);
            self.finish_sw_update();
        } else if updater.is_finished() {
            info!("Firmware update finished, restarting");
            self.updater = None;
            self.set_status(DeviceStatus::SwUpdateComplete);
            self.finish_sw_update();
            self.schedule_soft_restart(0, now_ms);
        }
    }

    /// Return to normal mode and persist that decision
    fn finish_sw_update(&mut self) {
        self.mode = self.mode.transition(ModeEvent::SwUpdateDone);
        self.config.set_device_mode(DeviceMode::Normal);
        self.config.set_sw_update_beta(false);
        self.config.commit();
    }

    fn forward_config_changes(&mut self) {
        for channel in self.config_changes.drain(..) {
            for layer in self.protocols.iter_mut() {
                layer.notify_config_change(channel);
            }
        }
    }

    // ---- Timers ----

    /// Fixed-frequency timer hook, for timers driven from the main loop
    pub fn on_timer(&self) {
        self.registry.on_timer();
    }

    /// High-frequency timer hook, for timers driven from the main loop
    pub fn on_fast_timer(&self) {
        self.registry.on_fast_timer();
    }

    // ---- Commands ----

    /// Value command from the server
    pub fn handle_new_value(&mut self, value: &NewValue) -> Result<(), CommandError> {
        let now_ms = self.clock.millis();
        let result = self.with_elements(now_ms, |registry, ctx| {
            registry
                .find_mut(value.channel)
                .ok_or(CommandError::UnknownChannel)?
                .handle_new_value(ctx, value)
        });
        self.forward_config_changes();
        result.unwrap_or(Err(CommandError::Busy))
    }

    /// Channel configuration from the server
    pub fn handle_channel_config(
        &mut self,
        message: &ChannelConfigMessage,
    ) -> Result<ConfigResult, CommandError> {
        let now_ms = self.clock.millis();
        let result = self.with_elements(now_ms, |registry, ctx| {
            registry
                .find_mut(message.channel)
                .map(|element| element.handle_channel_config(ctx, message, ConfigOrigin::Server))
                .ok_or(CommandError::UnknownChannel)
        });
        self.forward_config_changes();
        result.unwrap_or(Err(CommandError::Busy))
    }

    /// Server's answer to a configuration sent by a channel
    pub fn handle_set_channel_config_result(
        &mut self,
        channel: u8,
        config_type: ConfigType,
        accepted: bool,
    ) -> Result<(), CommandError> {
        let now_ms = self.clock.millis();
        let result = self.with_elements(now_ms, |registry, ctx| {
            registry
                .find_mut(channel)
                .map(|element| element.handle_set_channel_config_result(ctx, config_type, accepted))
                .ok_or(CommandError::UnknownChannel)
        });
        self.forward_config_changes();
        result.unwrap_or(Err(CommandError::Busy))
    }

    /// Local action on a channel
    pub fn run_action(&mut self, channel: u8, action: Action) -> Result<(), CommandError> {
        let now_ms = self.clock.millis();
        let result = self.with_elements(now_ms, |registry, ctx| {
            registry
                .find_mut(channel)
                .ok_or(CommandError::UnknownChannel)?
                .handle_action(ctx, action)
        });
        self.forward_config_changes();
        result.unwrap_or(Err(CommandError::Busy))
    }

    /// Queue a device action for the next tick
    pub fn request(&mut self, action: LocalAction) -> bool {
        self.actions.push(action)
    }

    fn handle_local_actions(&mut self, now_ms: u64) {
        while let Some(action) = self.actions.pop() {
            debug!("Local action {:?}", action);
            self.run_local_action(action, now_ms);
            if self.phase != Phase::Running {
                return;
            }
        }
    }

    fn run_local_action(&mut self, action: LocalAction, now_ms: u64) {
        match action {
            LocalAction::SoftRestart => self.schedule_soft_restart(0, now_ms),
            LocalAction::EnterConfigMode => {
                if self.mode != DeviceMode::Config {
                    self.enter_config_mode(now_ms, true);
                }
            }
            LocalAction::LeaveConfigMode => {
                if self.mode == DeviceMode::Config {
                    self.schedule_soft_restart(0, now_ms);
                }
            }
            LocalAction::ToggleConfigMode => {
                if self.mode != DeviceMode::Config {
                    self.enter_config_mode(now_ms, true);
                } else {
                    self.schedule_soft_restart(0, now_ms);
                }
            }
            LocalAction::ResetToFactorySettings => self.reset_to_factory_settings(),
            LocalAction::StartLocalWebServer => {
                if let Some(web_server) = self.web_server.as_mut() {
                    web_server.start();
                }
            }
            LocalAction::StopLocalWebServer => {
                if let Some(web_server) = self.web_server.as_mut() {
                    web_server.stop();
                }
            }
            LocalAction::CheckSwUpdate => {
                let mode = self.mode.transition(ModeEvent::StartSwUpdate);
                if mode != self.mode {
                    info!("Firmware update requested");
                    self.mode = mode;
                }
            }
            LocalAction::EnterConfigModeOrResetToFactory => {
                if self.mode != DeviceMode::Config {
                    self.enter_config_mode(now_ms, true);
                } else if self
                    .supervisor
                    .config_mode_elapsed(now_ms)
                    .is_some_and(|elapsed| elapsed > FACTORY_RESET_GUARD_MS)
                {
                    self.reset_to_factory_settings();
                }
            }
        }
    }

    // ---- Restart control ----

    /// Restart after `delay_ms`; 0 restarts on the next tick
    pub fn schedule_soft_restart(&mut self, delay_ms: u64, now_ms: u64) {
        self.set_status(DeviceStatus::SoftwareReset);
        self.supervisor.schedule_soft_restart(delay_ms, now_ms);
    }

    pub fn cancel_soft_restart(&mut self) {
        self.supervisor.cancel_soft_restart();
    }

    /// Reconnect every protocol layer after `delay_ms`
    pub fn schedule_protocols_restart(&mut self, delay_ms: u64) {
        let now_ms = self.clock.millis();
        self.supervisor.schedule_protocols_restart(delay_ms, now_ms);
    }

    /// Re-arm the configuration-mode timeout (web UI activity)
    pub fn restart_config_mode_timeout(&mut self) {
        if self.mode != DeviceMode::Config {
            return;
        }
        let now_ms = self.clock.millis();
        self.supervisor.restart_config_mode_timeout(now_ms);
    }

    /// Save everything and restart the device
    ///
    /// The runtime is inert afterwards.
    pub fn soft_restart(&mut self) {
        self.status.set(DeviceStatus::SoftwareReset, false);
        let now_ms = self.clock.millis();
        self.with_elements(now_ms, |registry, ctx| {
            registry.for_each(|element| element.on_soft_reset(ctx));
        });
        if !self.factory_reset_pending {
            self.save_state(now_ms);
            self.config.commit();
        }
        if let Some(web_server) = self.web_server.as_mut() {
            web_server.stop();
        }
        if let Some(network) = self.network.as_mut() {
            network.uninit();
        }
        self.registry.lock(|registry| registry.set_timers_enabled(false));
        self.phase = Phase::Restarted;
        info!("Restarting");
        self.system.soft_reset();
    }

    /// Erase configuration (except the identity) and state, then restart
    pub fn reset_to_factory_settings(&mut self) {
        info!("Reset to factory settings");
        self.factory_reset_pending = true;
        if self.config.is_available() {
            self.config.reset_to_factory();
            self.config.commit();
        }
        if self.state.is_available() {
            self.state.erase();
        }
        self.soft_restart();
    }
}
