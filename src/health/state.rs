//! Health state machine.
//!
//! ```text
//! Healthy ──(N consecutive failed probes | passive ratio exceeded)──▶ Unhealthy
//! Unhealthy ──(M consecutive successful probes | ejection expired)──▶ Healthy
//! ```

use serde::Serialize;

use crate::config::HealthCheckConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Inputs to the health state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// An active probe succeeded; `consecutive` includes this one.
    ProbeSucceeded { consecutive: u32 },
    /// An active probe failed or timed out; `consecutive` includes this one.
    ProbeFailed { consecutive: u32 },
    /// Passive window failure ratio reached the threshold.
    PassiveThresholdExceeded,
    /// Passive ejection period ran out with no active checks configured.
    EjectionExpired,
}

/// Consecutive-result thresholds for active checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub unhealthy: u32,
    pub healthy: u32,
}

impl From<&HealthCheckConfig> for Thresholds {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            unhealthy: config.unhealthy_threshold.max(1),
            healthy: config.healthy_threshold.max(1),
        }
    }
}

/// Pure transition function.
pub fn next_state(state: HealthState, event: HealthEvent, thresholds: Thresholds) -> HealthState {
    use HealthEvent::*;
    use HealthState::*;
    match (state, event) {
        (Healthy, ProbeFailed { consecutive }) if consecutive >= thresholds.unhealthy => Unhealthy,
        (Healthy, PassiveThresholdExceeded) => Unhealthy,
        (Unhealthy, ProbeSucceeded { consecutive }) if consecutive >= thresholds.healthy => Healthy,
        (Unhealthy, EjectionExpired) => Healthy,
        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HealthEvent::*;
    use HealthState::*;

    const T: Thresholds = Thresholds {
        unhealthy: 5,
        healthy: 3,
    };

    #[test]
    fn failing_probes_need_the_full_streak() {
        assert_eq!(next_state(Healthy, ProbeFailed { consecutive: 4 }, T), Healthy);
        assert_eq!(next_state(Healthy, ProbeFailed { consecutive: 5 }, T), Unhealthy);
    }

    #[test]
    fn recovery_needs_the_full_streak() {
        assert_eq!(next_state(Unhealthy, ProbeSucceeded { consecutive: 2 }, T), Unhealthy);
        assert_eq!(next_state(Unhealthy, ProbeSucceeded { consecutive: 3 }, T), Healthy);
    }

    #[test]
    fn passive_events() {
        assert_eq!(next_state(Healthy, PassiveThresholdExceeded, T), Unhealthy);
        assert_eq!(next_state(Unhealthy, PassiveThresholdExceeded, T), Unhealthy);
        assert_eq!(next_state(Unhealthy, EjectionExpired, T), Healthy);
        assert_eq!(next_state(Healthy, ProbeSucceeded { consecutive: 9 }, T), Healthy);
    }
}
