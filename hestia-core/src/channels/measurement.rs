//! General-purpose measurement channel
//!
//! Publishes a value read from a [`MeasurementDriver`] together with
//! display settings (scaling, precision, units) that can be edited both on
//! the device and on the server.

use hestia_protocol::{
    ChannelConfigMessage, ChannelFunction, ConfigResult, ConfigType, MeasurementConfigBlock, Unit,
};
use serde::{Deserialize, Serialize};

use crate::element::{send_pending_value, Channel, Context, Element};
use crate::reconcile::{self, ConfigOrigin};
use crate::storage::tags;
use crate::traits::{MeasurementDriver, Uplink};

pub const MIN_REFRESH_INTERVAL_MS: u16 = 500;
pub const MAX_REFRESH_INTERVAL_MS: u16 = 60_000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u16 = 5000;
pub const MAX_PRECISION: u8 = 4;

/// Live display settings, persisted under `<ch>_gpm_common`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub value_divider: i32,
    pub value_multiplier: i32,
    pub value_added: i64,
    pub value_precision: u8,
    pub unit_before_value: Unit,
    pub unit_after_value: Unit,
    pub no_space_after_value: u8,
    pub keep_history: u8,
    pub chart_type: u8,
    pub refresh_interval_ms: u16,
}

impl MeasurementConfig {
    fn normalize(&mut self) {
        self.value_precision = self.value_precision.min(MAX_PRECISION);
        self.refresh_interval_ms = self
            .refresh_interval_ms
            .clamp(MIN_REFRESH_INTERVAL_MS, MAX_REFRESH_INTERVAL_MS);
    }
}

/// Compiled-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasurementDefaults {
    pub value_divider: i32,
    pub value_multiplier: i32,
    pub value_added: i64,
    pub value_precision: u8,
    pub unit_before_value: Unit,
    pub unit_after_value: Unit,
}

impl MeasurementDefaults {
    fn initial_config(&self) -> MeasurementConfig {
        let mut config = MeasurementConfig {
            value_divider: self.value_divider,
            value_multiplier: self.value_multiplier,
            value_added: self.value_added,
            value_precision: self.value_precision,
            unit_before_value: self.unit_before_value.clone(),
            unit_after_value: self.unit_after_value.clone(),
            no_space_after_value: 0,
            keep_history: 0,
            chart_type: 0,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        };
        config.normalize();
        config
    }

    fn matches(&self, block: &MeasurementConfigBlock) -> bool {
        self.value_divider == block.default_value_divider
            && self.value_multiplier == block.default_value_multiplier
            && self.value_added == block.default_value_added
            && self.value_precision == block.default_value_precision
            && self.unit_before_value == block.default_unit_before_value
            && self.unit_after_value == block.default_unit_after_value
    }
}

/// Measurement channel over a driver
pub struct GeneralPurposeMeasurement<D> {
    channel: Channel,
    driver: D,
    defaults: MeasurementDefaults,
    config: MeasurementConfig,
    last_read_at: Option<u64>,
}

impl<D: MeasurementDriver> GeneralPurposeMeasurement<D> {
    pub fn new(driver: D, defaults: MeasurementDefaults) -> Self {
        Self {
            channel: Channel::new(ChannelFunction::GeneralPurposeMeasurement),
            driver,
            config: defaults.initial_config(),
            defaults,
            last_read_at: None,
        }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn defaults(&self) -> &MeasurementDefaults {
        &self.defaults
    }

    /// Apply a change to the live settings
    ///
    /// Returns whether anything changed after clamping.
    pub fn update(
        &mut self,
        ctx: &mut Context<'_>,
        origin: ConfigOrigin,
        change: impl FnOnce(&mut MeasurementConfig),
    ) -> bool {
        let mut next = self.config.clone();
        change(&mut next);
        next.normalize();
        let changed = reconcile::set_field(&mut self.config, next);
        if changed && origin.persists() {
            let key = (self.channel.number(), tags::MEASUREMENT_CONFIG);
            ctx.config.set_value(key, &self.config);
        }
        reconcile::record_update(ctx, &mut self.channel, ConfigType::Default, origin, changed);
        changed
    }

    pub fn set_value_divider(&mut self, ctx: &mut Context<'_>, divider: i32, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.value_divider = divider)
    }

    pub fn set_value_multiplier(&mut self, ctx: &mut Context<'_>, multiplier: i32, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.value_multiplier = multiplier)
    }

    pub fn set_value_added(&mut self, ctx: &mut Context<'_>, added: i64, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.value_added = added)
    }

    /// Precision is clamped to [`MAX_PRECISION`]
    pub fn set_value_precision(&mut self, ctx: &mut Context<'_>, precision: u8, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.value_precision = precision)
    }

    pub fn set_unit_before_value(&mut self, ctx: &mut Context<'_>, unit: Unit, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.unit_before_value = unit)
    }

    pub fn set_unit_after_value(&mut self, ctx: &mut Context<'_>, unit: Unit, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.unit_after_value = unit)
    }

    pub fn set_no_space_after_value(&mut self, ctx: &mut Context<'_>, value: u8, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.no_space_after_value = value)
    }

    pub fn set_keep_history(&mut self, ctx: &mut Context<'_>, value: u8, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.keep_history = value)
    }

    pub fn set_chart_type(&mut self, ctx: &mut Context<'_>, value: u8, origin: ConfigOrigin) -> bool {
        self.update(ctx, origin, |c| c.chart_type = value)
    }

    /// Interval is clamped to 500..=60000 ms
    pub fn set_refresh_interval_ms(&mut self, ctx: &mut Context<'_>, interval_ms: u32, origin: ConfigOrigin) -> bool {
        let interval_ms = interval_ms.min(MAX_REFRESH_INTERVAL_MS as u32) as u16;
        self.update(ctx, origin, |c| c.refresh_interval_ms = interval_ms)
    }

    /// Render live settings and compiled defaults into the wire block
    pub fn fill_block(&self) -> MeasurementConfigBlock {
        MeasurementConfigBlock {
            value_divider: self.config.value_divider,
            value_multiplier: self.config.value_multiplier,
            value_added: self.config.value_added,
            value_precision: self.config.value_precision,
            unit_before_value: self.config.unit_before_value.clone(),
            unit_after_value: self.config.unit_after_value.clone(),
            no_space_after_value: self.config.no_space_after_value,
            keep_history: self.config.keep_history,
            chart_type: self.config.chart_type,
            refresh_interval_ms: self.config.refresh_interval_ms,
            default_value_divider: self.defaults.value_divider,
            default_value_multiplier: self.defaults.value_multiplier,
            default_value_added: self.defaults.value_added,
            default_value_precision: self.defaults.value_precision,
            default_unit_before_value: self.defaults.unit_before_value.clone(),
            default_unit_after_value: self.defaults.unit_after_value.clone(),
        }
    }

    fn read_value(&mut self) {
        match self.driver.read() {
            Ok(value) => self.channel.set_f64(value),
            Err(e) => debug!("Measurement {}: read failed {:?}", self.channel.number(), e),
        }
    }
}

fn config_message(channel: &Channel, block: &MeasurementConfigBlock) -> Option<ChannelConfigMessage> {
    ChannelConfigMessage::new(
        channel.number(),
        channel.function().as_i32(),
        ConfigType::Default,
        &block.encode(),
    )
}

impl<D: MeasurementDriver> Element for GeneralPurposeMeasurement<D> {
    fn channel(&self) -> Option<&Channel> {
        Some(&self.channel)
    }

    fn channel_mut(&mut self) -> Option<&mut Channel> {
        Some(&mut self.channel)
    }

    fn on_load_config(&mut self, ctx: &mut Context<'_>) {
        let number = self.channel.number();
        match ctx
            .config
            .get_value::<MeasurementConfig>((number, tags::MEASUREMENT_CONFIG))
        {
            Some(mut stored) => {
                stored.normalize();
                info!("Measurement {}: config loaded", number);
                self.config = stored;
            }
            None => debug!("Measurement {}: using defaults", number),
        }
        reconcile::load_change_flag(ctx, &mut self.channel, ConfigType::Default);
    }

    fn on_init(&mut self, ctx: &mut Context<'_>) {
        self.driver.init();
        self.read_value();
        self.last_read_at = Some(ctx.now_ms);
    }

    fn on_registered(&mut self, ctx: &mut Context<'_>) {
        reconcile::on_registered(ctx, &mut self.channel, ConfigType::Default);
        self.channel.mark_value_pending();
    }

    fn iterate_always(&mut self, ctx: &mut Context<'_>) {
        let due = match self.last_read_at {
            Some(at) => ctx.now_ms.saturating_sub(at) > self.config.refresh_interval_ms as u64,
            None => true,
        };
        if due {
            self.last_read_at = Some(ctx.now_ms);
            self.read_value();
        }
    }

    fn iterate_connected(&mut self, _ctx: &mut Context<'_>, uplink: &mut dyn Uplink) -> bool {
        let block = self.fill_block();
        if !reconcile::send_pending_config(&mut self.channel, uplink, |channel| {
            config_message(channel, &block)
        }) {
            return false;
        }
        send_pending_value(self, uplink)
    }

    fn handle_channel_config(
        &mut self,
        ctx: &mut Context<'_>,
        message: &ChannelConfigMessage,
        origin: ConfigOrigin,
    ) -> ConfigResult {
        if message.config_type != ConfigType::Default {
            return ConfigResult::TypeNotSupported;
        }
        if message.function != ChannelFunction::GeneralPurposeMeasurement.as_i32() {
            return ConfigResult::FunctionNotSupported;
        }
        let block = match MeasurementConfigBlock::decode(&message.payload) {
            Ok(block) => block,
            Err(_) => return ConfigResult::DataError,
        };

        let number = self.channel.number();
        if origin == ConfigOrigin::Server
            && reconcile::is_local_change_pending(ctx, &self.channel, ConfigType::Default)
        {
            info!("Measurement {}: local config pending, server values ignored", number);
            return ConfigResult::LocalConfigPending;
        }

        self.update(ctx, origin, |c| {
            c.value_divider = block.value_divider;
            c.value_multiplier = block.value_multiplier;
            c.value_added = block.value_added;
            c.value_precision = block.value_precision;
            c.unit_before_value = block.unit_before_value.clone();
            c.unit_after_value = block.unit_after_value.clone();
            c.no_space_after_value = block.no_space_after_value;
            c.keep_history = block.keep_history;
            c.chart_type = block.chart_type;
            c.refresh_interval_ms = block.refresh_interval_ms;
        });

        if origin == ConfigOrigin::Server && !self.defaults.matches(&block) {
            info!("Measurement {}: server defaults are stale", number);
            reconcile::raise_change_flag(ctx, &mut self.channel, ConfigType::Default);
        }
        reconcile::on_server_config(&mut self.channel);
        ConfigResult::Success
    }

    fn handle_set_channel_config_result(
        &mut self,
        ctx: &mut Context<'_>,
        config_type: ConfigType,
        accepted: bool,
    ) {
        reconcile::on_set_config_result(ctx, &mut self.channel, config_type, accepted);
    }
}
