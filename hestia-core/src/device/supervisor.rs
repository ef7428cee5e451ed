//! Restart supervision
//!
//! Tracks every timeout that can end in a restart: configuration-mode
//! inactivity, scheduled soft restarts, scheduled protocol restarts and
//! prolonged connection failure. The runtime asks [`Supervisor::check`]
//! once per tick and acts on the verdict.

/// Default configuration-mode inactivity timeout
pub const CONFIG_MODE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// What the runtime must do this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// Nothing due
    Ok,
    /// Restart the device
    SoftRestart(RestartCause),
    /// Disconnect every protocol layer so they reconnect
    RestartProtocols,
}

/// Why a soft restart was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RestartCause {
    ConfigModeTimeout,
    Scheduled,
    ConnectionFailTimeout,
}

/// A delay measured from the moment it was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadline {
    requested_at: u64,
    delay_ms: u64,
}

impl Deadline {
    fn new(now_ms: u64, delay_ms: u64) -> Self {
        Self {
            requested_at: now_ms,
            delay_ms: delay_ms.max(1),
        }
    }

    fn passed(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.requested_at) > self.delay_ms
    }
}

/// Restart and timeout bookkeeping
#[derive(Debug, Clone)]
pub struct Supervisor {
    config_mode_timeout_ms: u64,
    /// Set while configuration mode is active
    config_mode_entered_at: Option<u64>,
    /// Inactivity timeout armed (configuration mode entered on request)
    config_mode_timeout: Option<u64>,
    soft_restart: Option<Deadline>,
    protocol_restart: Option<Deadline>,
    connection_fail_timeout_s: u32,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(CONFIG_MODE_TIMEOUT_MS, 0)
    }
}

impl Supervisor {
    /// Create a supervisor
    ///
    /// `connection_fail_timeout_s` of 0 disables the connection timeout.
    pub fn new(config_mode_timeout_ms: u64, connection_fail_timeout_s: u32) -> Self {
        Self {
            config_mode_timeout_ms,
            config_mode_entered_at: None,
            config_mode_timeout: None,
            soft_restart: None,
            protocol_restart: None,
            connection_fail_timeout_s,
        }
    }

    /// Configuration mode entered
    ///
    /// Only a requested entry arms the inactivity timeout; a device that
    /// boots into configuration mode because it is not configured waits
    /// indefinitely.
    pub fn config_mode_entered(&mut self, now_ms: u64, requested: bool) {
        if self.config_mode_entered_at.is_none() {
            self.config_mode_entered_at = Some(now_ms);
        }
        if requested {
            self.config_mode_timeout = Some(now_ms);
        }
    }

    pub fn config_mode_left(&mut self) {
        self.config_mode_entered_at = None;
        self.config_mode_timeout = None;
    }

    /// Time spent in configuration mode so far
    pub fn config_mode_elapsed(&self, now_ms: u64) -> Option<u64> {
        self.config_mode_entered_at
            .map(|at| now_ms.saturating_sub(at))
    }

    /// Re-arm the inactivity timeout after user activity
    ///
    /// Ignored while a forced restart is pending.
    pub fn restart_config_mode_timeout(&mut self, now_ms: u64) {
        if self.soft_restart.is_some() || self.config_mode_entered_at.is_none() {
            return;
        }
        self.config_mode_entered_at = Some(now_ms);
        if self.config_mode_timeout.is_some() {
            self.config_mode_timeout = Some(now_ms);
        }
    }

    /// Restart after `delay_ms`; a delay of 0 restarts on the next tick
    pub fn schedule_soft_restart(&mut self, delay_ms: u64, now_ms: u64) {
        info!("Soft restart in {} ms", delay_ms);
        self.soft_restart = Some(Deadline::new(now_ms, delay_ms));
        self.config_mode_timeout = None;
    }

    pub fn cancel_soft_restart(&mut self) {
        self.soft_restart = None;
    }

    pub fn is_restart_pending(&self) -> bool {
        self.soft_restart.is_some()
    }

    /// Reconnect every protocol layer after `delay_ms`
    pub fn schedule_protocols_restart(&mut self, delay_ms: u64, now_ms: u64) {
        info!("Protocols restart in {} ms", delay_ms);
        self.protocol_restart = Some(Deadline::new(now_ms, delay_ms));
    }

    /// Check all timeouts
    ///
    /// `connection_fail_s` is the longest time any link (network or
    /// protocol) has been failing. Returns the first action due; a protocol
    /// restart is consumed when returned.
    pub fn check(&mut self, now_ms: u64, connection_fail_s: u32) -> Verdict {
        if let Some(at) = self.config_mode_timeout {
            if now_ms.saturating_sub(at) > self.config_mode_timeout_ms {
                info!("Config mode timeout");
                return Verdict::SoftRestart(RestartCause::ConfigModeTimeout);
            }
        }

        if self.soft_restart.is_some_and(|d| d.passed(now_ms)) {
            return Verdict::SoftRestart(RestartCause::Scheduled);
        }

        if self.connection_fail_timeout_s > 0 && connection_fail_s >= self.connection_fail_timeout_s {
            warn!("Connection failing for {} s", connection_fail_s);
            return Verdict::SoftRestart(RestartCause::ConnectionFailTimeout);
        }

        if self.protocol_restart.is_some_and(|d| d.passed(now_ms)) {
            self.protocol_restart = None;
            return Verdict::RestartProtocols;
        }

        Verdict::Ok
    }
}
