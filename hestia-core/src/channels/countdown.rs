//! Countdown timer shared by timed outputs

use hestia_protocol::TimerReport;

/// Scheduled level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Countdown {
    #[default]
    Idle,
    Running {
        /// Absolute expiry time
        ends_at: u64,
        /// Level applied on expiry
        resume_level: bool,
    },
}

impl Countdown {
    /// Start a countdown from `now_ms`
    ///
    /// A zero duration yields [`Countdown::Idle`].
    pub fn start(now_ms: u64, duration_ms: u32, resume_level: bool) -> Self {
        if duration_ms == 0 {
            return Countdown::Idle;
        }
        Countdown::Running {
            ends_at: now_ms + duration_ms as u64,
            resume_level,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Countdown::Running { .. })
    }

    /// Time left, saturating at zero
    pub fn remaining_ms(&self, now_ms: u64) -> u32 {
        match *self {
            Countdown::Idle => 0,
            Countdown::Running { ends_at, .. } => {
                ends_at.saturating_sub(now_ms).min(u32::MAX as u64) as u32
            }
        }
    }

    /// Level to apply if the countdown has expired
    pub fn expired(&self, now_ms: u64) -> Option<bool> {
        match *self {
            Countdown::Running {
                ends_at,
                resume_level,
            } if now_ms >= ends_at => Some(resume_level),
            _ => None,
        }
    }

    /// Remaining-time report for the server
    pub fn report(&self, channel: u8, now_ms: u64) -> TimerReport {
        match *self {
            Countdown::Idle => TimerReport::idle(channel),
            Countdown::Running { resume_level, .. } => TimerReport {
                channel,
                remaining_ms: self.remaining_ms(now_ms),
                target_level: resume_level as u8,
                sender_id: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_is_idle() {
        assert_eq!(Countdown::start(100, 0, true), Countdown::Idle);
    }

    #[test]
    fn test_expiry() {
        let countdown = Countdown::start(1000, 500, false);
        assert_eq!(countdown.remaining_ms(1200), 300);
        assert_eq!(countdown.expired(1499), None);
        assert_eq!(countdown.expired(1500), Some(false));
        assert_eq!(countdown.remaining_ms(2000), 0);
    }

    #[test]
    fn test_report() {
        assert!(Countdown::Idle.report(3, 0).is_idle());

        let report = Countdown::start(0, 2000, true).report(3, 500);
        assert_eq!(report.channel, 3);
        assert_eq!(report.remaining_ms, 1500);
        assert_eq!(report.target_level, 1);
    }
}
