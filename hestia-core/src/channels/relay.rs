//! Relay channel with countdown timing
//!
//! The relay keeps three things in step: the physical output, the channel
//! value reported to the server and the persisted state record. Every level
//! or countdown change goes through [`Relay::apply`], which writes the
//! output, marks the reports pending and schedules a state save.
//!
//! # Timing
//!
//! - Plain functions (power/light switch): an explicit duration arms a
//!   countdown to the opposite level.
//! - Staircase timer: turning on without a duration uses the stored
//!   duration; expiry always returns to off.
//! - Impulse functions (gate, door, lock): like staircase, but the stored
//!   duration is taken from each remote "on" command.
//!
//! A new command always replaces a running countdown; countdowns are never
//! merged.

use hestia_protocol::{
    ChannelConfigMessage, ChannelFunction, ConfigResult, ConfigType, NewValue, StaircaseTimerBlock,
};

use super::countdown::Countdown;
use crate::element::{send_pending_value, Action, Channel, CommandError, Context, Element};
use crate::reconcile::{self, ConfigOrigin};
use crate::storage::tags;
use crate::traits::{RelayOutput, Uplink};

/// Delay before a changed relay state is saved
pub const RELAY_SAVE_DELAY_MS: u32 = 5000;

/// Relay level at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateOnInit {
    #[default]
    Off,
    On,
    /// Restore the persisted level and remaining countdown
    Restore,
    /// Restore mode, persisted level was off
    RestoredOff,
    /// Restore mode, persisted level was on
    RestoredOn,
}

impl StateOnInit {
    pub fn is_restore(self) -> bool {
        matches!(
            self,
            StateOnInit::Restore | StateOnInit::RestoredOff | StateOnInit::RestoredOn
        )
    }

    fn starts_on(self) -> bool {
        matches!(self, StateOnInit::On | StateOnInit::RestoredOn)
    }
}

/// Persisted relay state: duration followed by a flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelayStateRecord {
    /// Stored pulse duration, or remaining countdown in restore mode
    pub duration_ms: u32,
    pub flags: u8,
}

impl RelayStateRecord {
    pub const FLAG_ON: u8 = 1 << 0;
    pub const FLAG_STAIRCASE: u8 = 1 << 1;
    pub const FLAG_IMPULSE: u8 = 1 << 2;

    /// Encoded size in the state section
    pub const SIZE: usize = 5;

    pub fn is_on(&self) -> bool {
        self.flags & Self::FLAG_ON != 0
    }

    pub fn is_staircase(&self) -> bool {
        self.flags & Self::FLAG_STAIRCASE != 0
    }

    pub fn is_impulse(&self) -> bool {
        self.flags & Self::FLAG_IMPULSE != 0
    }

    fn read(ctx: &mut Context<'_>) -> Option<Self> {
        let duration_ms = ctx.state.read_u32()?;
        let flags = ctx.state.read_u8()?;
        Some(Self { duration_ms, flags })
    }

    fn write(&self, ctx: &mut Context<'_>) {
        ctx.state.write_u32(self.duration_ms);
        ctx.state.write_u8(self.flags);
    }
}

/// Switchable output channel
pub struct Relay<O> {
    channel: Channel,
    output: O,
    countdown: Countdown,
    state_on_init: StateOnInit,
    /// Duration used when turning on without an explicit one
    stored_duration_ms: u32,
    /// Countdown restored from the state section, applied in `on_init`
    boot_duration_ms: u32,
    keep_turn_on_duration: bool,
    min_allowed_duration_ms: u32,
    timer_report_pending: bool,
}

impl<O: RelayOutput> Relay<O> {
    pub fn new(output: O, function: ChannelFunction) -> Self {
        Self {
            channel: Channel::new(function),
            output,
            countdown: Countdown::Idle,
            state_on_init: StateOnInit::Off,
            stored_duration_ms: 0,
            boot_duration_ms: 0,
            keep_turn_on_duration: false,
            min_allowed_duration_ms: 0,
            timer_report_pending: false,
        }
    }

    pub fn with_state_on_init(mut self, state: StateOnInit) -> Self {
        self.state_on_init = state;
        self
    }

    /// Reuse the stored duration for every turn-on without a duration
    pub fn keep_turn_on_duration(mut self, keep: bool) -> Self {
        self.keep_turn_on_duration = keep;
        self
    }

    /// Lower bound for durations in remote "on" commands
    pub fn with_min_allowed_duration(mut self, duration_ms: u32) -> Self {
        self.min_allowed_duration_ms = duration_ms.min(u16::MAX as u32);
        self
    }

    /// Preset the stored turn-on duration (staircase time)
    pub fn with_stored_duration(mut self, duration_ms: u32) -> Self {
        self.stored_duration_ms = duration_ms;
        self
    }

    pub fn is_on(&self) -> bool {
        self.output.is_on()
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn stored_duration_ms(&self) -> u32 {
        self.stored_duration_ms
    }

    pub fn state_on_init(&self) -> StateOnInit {
        self.state_on_init
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    fn is_staircase(&self) -> bool {
        self.channel.function().is_staircase()
    }

    fn is_impulse(&self) -> bool {
        self.channel.function().is_impulse()
    }

    fn is_pulse(&self) -> bool {
        self.is_staircase() || self.is_impulse()
    }

    /// Whether turning on without a duration uses the stored one
    ///
    /// This includes a remote "on" with duration 0, so a staircase light
    /// switched on from the server always turns itself off again after the
    /// stored time. Use [`Action::TurnOnWithoutTimer`] for a steady on.
    pub fn keeps_duration(&self) -> bool {
        self.keep_turn_on_duration || self.is_pulse()
    }

    fn resume_level(&self, level: bool) -> bool {
        if self.is_pulse() {
            false
        } else {
            !level
        }
    }

    fn start_countdown(&self, level: bool, duration_ms: u32, now_ms: u64) -> Countdown {
        let resume_level = self.resume_level(level);
        if resume_level == level {
            return Countdown::Idle;
        }
        Countdown::start(now_ms, duration_ms, resume_level)
    }

    /// Turn on, with a countdown back to off when `duration_ms` > 0
    pub fn turn_on(&mut self, ctx: &mut Context<'_>, duration_ms: u32) {
        let duration_ms = if duration_ms == 0 && self.keeps_duration() {
            self.stored_duration_ms
        } else {
            duration_ms
        };
        info!("Relay {}: on ({} ms)", self.channel.number(), duration_ms);
        let countdown = self.start_countdown(true, duration_ms, ctx.now_ms);
        self.apply(ctx, true, countdown);
    }

    /// Turn off, with a countdown back to on when `duration_ms` > 0
    pub fn turn_off(&mut self, ctx: &mut Context<'_>, duration_ms: u32) {
        info!("Relay {}: off ({} ms)", self.channel.number(), duration_ms);
        let countdown = self.start_countdown(false, duration_ms, ctx.now_ms);
        self.apply(ctx, false, countdown);
    }

    pub fn toggle(&mut self, ctx: &mut Context<'_>, duration_ms: u32) {
        if self.is_on() {
            self.turn_off(ctx, duration_ms);
        } else {
            self.turn_on(ctx, duration_ms);
        }
    }

    /// Set level and countdown together
    fn apply(&mut self, ctx: &mut Context<'_>, level: bool, countdown: Countdown) {
        self.output.set(level);

        let level_changed = self.channel.value().as_bool() != Some(level);
        self.channel.set_bool(level);

        let countdown_changed = self.countdown != countdown;
        self.countdown = countdown;
        if countdown_changed {
            self.timer_report_pending = true;
        }

        if level_changed || countdown_changed {
            ctx.state.schedule_save(RELAY_SAVE_DELAY_MS, ctx.now_ms);
        }
    }

    /// Switch function; returns whether the timing kind changed
    fn set_function(&mut self, function: ChannelFunction) -> bool {
        let was_staircase = self.is_staircase();
        let was_impulse = self.is_impulse();
        self.channel.set_function(function);
        if !self.is_pulse() && !self.keep_turn_on_duration {
            self.stored_duration_ms = 0;
        }
        was_staircase != self.is_staircase() || was_impulse != self.is_impulse()
    }

    fn supports(function: ChannelFunction) -> bool {
        !matches!(function, ChannelFunction::GeneralPurposeMeasurement)
    }

    fn state_record(&self, now_ms: u64) -> RelayStateRecord {
        let mut record = RelayStateRecord {
            duration_ms: self.stored_duration_ms,
            flags: 0,
        };
        if self.is_staircase() {
            record.flags |= RelayStateRecord::FLAG_STAIRCASE;
        } else if self.is_impulse() {
            record.flags |= RelayStateRecord::FLAG_IMPULSE;
        } else if self.state_on_init.is_restore() {
            record.duration_ms = self.countdown.remaining_ms(now_ms);
        }
        if self.state_on_init.is_restore() && self.is_on() {
            record.flags |= RelayStateRecord::FLAG_ON;
        }
        record
    }
}

impl<O: RelayOutput> Element for Relay<O> {
    fn channel(&self) -> Option<&Channel> {
        Some(&self.channel)
    }

    fn channel_mut(&mut self) -> Option<&mut Channel> {
        Some(&mut self.channel)
    }

    fn on_load_config(&mut self, ctx: &mut Context<'_>) {
        let number = self.channel.number();
        if let Some(code) = ctx.config.get_i32((number, tags::CHANNEL_FUNCTION)) {
            match ChannelFunction::from_i32(code) {
                Some(function) if Self::supports(function) => {
                    debug!("Relay {}: function {}", number, code);
                    self.set_function(function);
                }
                _ => warn!("Relay {}: ignoring stored function {}", number, code),
            }
        }
    }

    fn on_load_state(&mut self, ctx: &mut Context<'_>) {
        let Some(record) = RelayStateRecord::read(ctx) else {
            return;
        };

        if self.state_on_init.is_restore() {
            self.state_on_init = if record.is_on() {
                StateOnInit::RestoredOn
            } else {
                StateOnInit::RestoredOff
            };
        }
        if record.is_staircase() {
            self.set_function(ChannelFunction::StaircaseTimer);
        } else if record.is_impulse() && !self.is_impulse() {
            self.set_function(ChannelFunction::ControllingTheGate);
        }

        if self.is_pulse() {
            self.stored_duration_ms = record.duration_ms;
        } else if self.state_on_init.is_restore() {
            self.boot_duration_ms = record.duration_ms;
        }
        info!(
            "Relay {}: restored {:?}, {} ms",
            self.channel.number(),
            self.state_on_init,
            record.duration_ms
        );
    }

    fn on_init(&mut self, ctx: &mut Context<'_>) {
        let duration_ms = core::mem::take(&mut self.boot_duration_ms);
        let level = self.state_on_init.starts_on();
        if self.state_on_init.is_restore() && !self.is_pulse() {
            // Restored countdown as saved; 0 is a steady level
            let countdown = self.start_countdown(level, duration_ms, ctx.now_ms);
            self.apply(ctx, level, countdown);
        } else if level {
            self.turn_on(ctx, duration_ms);
        } else {
            self.turn_off(ctx, duration_ms);
        }
    }

    fn on_save_state(&mut self, ctx: &mut Context<'_>) {
        self.state_record(ctx.now_ms).write(ctx);
    }

    fn on_registered(&mut self, _ctx: &mut Context<'_>) {
        self.timer_report_pending = true;
        self.channel.mark_value_pending();
    }

    fn iterate_always(&mut self, ctx: &mut Context<'_>) {
        if let Some(level) = self.countdown.expired(ctx.now_ms) {
            debug!("Relay {}: countdown expired", self.channel.number());
            self.apply(ctx, level, Countdown::Idle);
        }
    }

    fn iterate_connected(&mut self, ctx: &mut Context<'_>, uplink: &mut dyn Uplink) -> bool {
        if self.timer_report_pending {
            let report = self.countdown.report(self.channel.number(), ctx.now_ms);
            if uplink.send_remaining_time(&report) {
                self.timer_report_pending = false;
            }
            return false;
        }
        send_pending_value(self, uplink)
    }

    fn handle_new_value(&mut self, ctx: &mut Context<'_>, value: &NewValue) -> Result<(), CommandError> {
        match value.value.as_bool() {
            // Duration 0 falls back to the stored duration, see `keeps_duration`
            Some(true) => {
                let duration_ms = value.duration_ms.max(self.min_allowed_duration_ms);
                if self.is_impulse() {
                    self.stored_duration_ms = duration_ms;
                }
                self.turn_on(ctx, duration_ms);
                Ok(())
            }
            Some(false) => {
                // A pulse function's "off" may carry its turn-on duration
                let duration_ms = if self.keeps_duration() {
                    0
                } else {
                    value.duration_ms
                };
                self.turn_off(ctx, duration_ms);
                Ok(())
            }
            None => {
                warn!("Relay {}: invalid value", self.channel.number());
                Err(CommandError::InvalidValue)
            }
        }
    }

    fn handle_channel_config(
        &mut self,
        ctx: &mut Context<'_>,
        message: &ChannelConfigMessage,
        origin: ConfigOrigin,
    ) -> ConfigResult {
        let Some(function) = ChannelFunction::from_i32(message.function) else {
            return ConfigResult::FunctionNotSupported;
        };
        if !Self::supports(function) {
            return ConfigResult::FunctionNotSupported;
        }

        let number = self.channel.number();
        let function_changed = self.channel.function() != function;
        if self.set_function(function) {
            ctx.state.schedule_save(RELAY_SAVE_DELAY_MS, ctx.now_ms);
        }
        if function_changed && origin.persists() {
            ctx.config
                .set_i32((number, tags::CHANNEL_FUNCTION), function.as_i32());
        }
        reconcile::record_update(ctx, &mut self.channel, message.config_type, origin, function_changed);

        if message.size() == 0 {
            return ConfigResult::Success;
        }
        match (function, message.config_type) {
            (ChannelFunction::StaircaseTimer, ConfigType::Default) => {
                let block = match StaircaseTimerBlock::decode(&message.payload) {
                    Ok(block) => block,
                    Err(_) => return ConfigResult::DataError,
                };
                if block.time_ms != self.stored_duration_ms {
                    debug!("Relay {}: staircase time {} ms", number, block.time_ms);
                    self.stored_duration_ms = block.time_ms;
                    ctx.state.schedule_save(RELAY_SAVE_DELAY_MS, ctx.now_ms);
                }
                ConfigResult::Success
            }
            (_, ConfigType::Default) => ConfigResult::Success,
            _ => ConfigResult::TypeNotSupported,
        }
    }

    fn handle_action(&mut self, ctx: &mut Context<'_>, action: Action) -> Result<(), CommandError> {
        match action {
            Action::TurnOn => self.turn_on(ctx, 0),
            Action::TurnOff => self.turn_off(ctx, 0),
            Action::Toggle => self.toggle(ctx, 0),
            Action::TurnOnWithoutTimer => self.apply(ctx, true, Countdown::Idle),
            Action::TurnOnFor(duration_ms) => self.turn_on(ctx, duration_ms),
            Action::TurnOffFor(duration_ms) => self.turn_off(ctx, duration_ms),
        }
        Ok(())
    }
}
