//! Read-only introspection of a controller

use std::fmt;
use std::time::Duration;

use crate::encoder::EncodedTimestamp;
use crate::refresher::Strategy;

/// Where `get()` currently takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Explicitly stopped; served like `DirectCompute` until the next call
    Idle,
    /// Every call reads the clock and encodes
    DirectCompute,
    /// Calls read the cache kept current by a refresher
    Promoted(Strategy),
}

impl ControllerState {
    pub fn is_promoted(&self) -> bool {
        matches!(self, ControllerState::Promoted(_))
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => f.write_str("idle"),
            ControllerState::DirectCompute => f.write_str("direct"),
            ControllerState::Promoted(strategy) => write!(f, "promoted({})", strategy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionReason {
    /// Call rate crossed the configured threshold
    RateThreshold,
    ExplicitStart,
    ExplicitStop,
    /// Refresher saw no calls for the idle cooldown
    IdleCooldown,
    /// Launcher reported worker threads unavailable
    WorkerUnavailable,
    WorkerSpawnFailed,
    /// Worker crashed or exited unexpectedly
    WorkerExited,
    /// No tokio runtime to host the cooperative task
    CooperativeUnavailable,
    /// Cooperative task panicked or was dropped by its runtime
    CooperativeExited,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::RateThreshold => "rate_threshold",
            TransitionReason::ExplicitStart => "explicit_start",
            TransitionReason::ExplicitStop => "explicit_stop",
            TransitionReason::IdleCooldown => "idle_cooldown",
            TransitionReason::WorkerUnavailable => "worker_unavailable",
            TransitionReason::WorkerSpawnFailed => "worker_spawn_failed",
            TransitionReason::WorkerExited => "worker_exited",
            TransitionReason::CooperativeUnavailable => "cooperative_unavailable",
            TransitionReason::CooperativeExited => "cooperative_exited",
        }
    }

    /// Whether this transition replaced a failed or missing worker
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            TransitionReason::WorkerUnavailable
                | TransitionReason::WorkerSpawnFailed
                | TransitionReason::WorkerExited
        )
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ControllerState,
    pub to: ControllerState,
    pub reason: TransitionReason,
}

/// Snapshot of a controller's state and history
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub state: ControllerState,
    /// Latest cached value; `None` until the first promotion
    pub cached: Option<EncodedTimestamp>,
    pub worker_available: bool,
    pub worker_active: bool,
    pub cooperative_available: bool,
    pub cooperative_active: bool,
    /// Time since the refresher last saw a call, while promoted
    pub idle_for: Option<Duration>,
    pub last_transition: Option<Transition>,
    pub promotions: u64,
    pub demotions: u64,
    pub fallbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ControllerState::Idle.to_string(), "idle");
        assert_eq!(ControllerState::DirectCompute.to_string(), "direct");
        assert_eq!(
            ControllerState::Promoted(Strategy::WorkerThread).to_string(),
            "promoted(worker)"
        );
    }

    #[test]
    fn test_fallback_reasons() {
        assert!(TransitionReason::WorkerSpawnFailed.is_fallback());
        assert!(TransitionReason::WorkerExited.is_fallback());
        assert!(!TransitionReason::IdleCooldown.is_fallback());
        assert!(!TransitionReason::CooperativeUnavailable.is_fallback());
    }
}
