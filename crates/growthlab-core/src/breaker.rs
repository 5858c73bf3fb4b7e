//! Quota circuit breaker for autonomous traffic.
//!
//! Normal → Suspended when the governor reports quota exhaustion, Suspended → Normal once the
//! cooldown has elapsed. The transition back is lazy: it happens on the next query after
//! `cooldown_until`, so no timer task is needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaState {
    Normal,
    Suspended { cooldown_until: Instant },
}

/// Shared, cloneable breaker handle. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct QuotaCircuitBreaker {
    state: Arc<Mutex<QuotaState>>,
    cooldown: Duration,
}

impl QuotaCircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QuotaState::Normal)),
            cooldown,
        }
    }

    pub fn from_settings(settings: &BreakerSettings) -> Self {
        Self::new(settings.cooldown())
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Record a quota-exhaustion event. A report while already suspended keeps the
    /// existing `cooldown_until`.
    pub fn report_quota_exhausted(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        match *state {
            QuotaState::Suspended { cooldown_until } if now < cooldown_until => {
                debug!(
                    target: "growthlab::breaker",
                    remaining_ms = (cooldown_until - now).as_millis() as u64,
                    "quota exhaustion reported while already suspended"
                );
            }
            _ => {
                *state = QuotaState::Suspended {
                    cooldown_until: now + self.cooldown,
                };
                warn!(
                    target: "growthlab::breaker",
                    cooldown_secs = self.cooldown.as_secs(),
                    "quota exhausted; suspending autonomous generation"
                );
            }
        }
    }

    /// Whether autonomous traffic is currently suspended. Clears to Normal once the
    /// cooldown has passed.
    pub fn is_suspended(&self) -> bool {
        matches!(self.state(), QuotaState::Suspended { .. })
    }

    /// Current state, after applying any pending cooldown expiry.
    pub fn state(&self) -> QuotaState {
        let mut state = self.lock();
        if let QuotaState::Suspended { cooldown_until } = *state {
            if Instant::now() >= cooldown_until {
                *state = QuotaState::Normal;
                info!(target: "growthlab::breaker", "quota cooldown elapsed; autonomous generation resumed");
            }
        }
        *state
    }

    /// Time left until autonomous traffic resumes (zero when Normal).
    pub fn remaining_cooldown(&self) -> Duration {
        match self.state() {
            QuotaState::Normal => Duration::ZERO,
            QuotaState::Suspended { cooldown_until } => {
                cooldown_until.saturating_duration_since(Instant::now())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QuotaState> {
        // State is a plain enum; a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for QuotaCircuitBreaker {
    fn default() -> Self {
        Self::from_settings(&BreakerSettings::default())
    }
}
