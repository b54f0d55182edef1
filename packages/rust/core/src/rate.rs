//! Preventive pacing of generation backend calls.
//!
//! Every backend dispatch in a run is preceded by
//! [`RateController::before_call`], which enforces a minimum gap between
//! calls and adds a growing pause on every Nth call.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use postforge_shared::{AppConfig, RateLimitSettings};

/// Pacing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Minimum spacing between consecutive calls.
    pub min_interval: Duration,
    /// Extra pause on every Nth call. 0 disables it.
    pub backoff_every: u64,
    /// Extra pause per call made so far.
    pub backoff_step: Duration,
    pub backoff_ceiling: Duration,
}

impl RatePolicy {
    /// No waiting at all.
    pub fn disabled() -> Self {
        Self {
            min_interval: Duration::ZERO,
            backoff_every: 0,
            backoff_step: Duration::ZERO,
            backoff_ceiling: Duration::ZERO,
        }
    }

    /// Progressive pause owed before the call made when `call_count` calls
    /// have already happened.
    pub fn backoff_for(&self, call_count: u64) -> Duration {
        if self.backoff_every == 0 || call_count == 0 || call_count % self.backoff_every != 0 {
            return Duration::ZERO;
        }
        let factor = u32::try_from(call_count).unwrap_or(u32::MAX);
        self.backoff_step
            .saturating_mul(factor)
            .min(self.backoff_ceiling)
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

impl From<&RateLimitSettings> for RatePolicy {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            min_interval: Duration::from_millis(settings.min_interval_ms),
            backoff_every: settings.backoff_every,
            backoff_step: Duration::from_millis(settings.backoff_step_ms),
            backoff_ceiling: Duration::from_millis(settings.backoff_ceiling_ms),
        }
    }
}

impl From<&AppConfig> for RatePolicy {
    fn from(config: &AppConfig) -> Self {
        Self::from(&config.rate_limit)
    }
}

/// Per-run call bookkeeping. Only [`RateController`] mutates it.
#[derive(Debug, Default)]
pub struct RateState {
    call_count: u64,
    last_call_time: Option<Instant>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls gated so far.
    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    pub fn last_call_time(&self) -> Option<Instant> {
        self.last_call_time
    }
}

/// Applies a [`RatePolicy`] to a [`RateState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RateController {
    policy: RatePolicy,
}

impl RateController {
    pub fn new(policy: RatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    /// Wait until the next backend call is allowed, then record it.
    pub async fn before_call(&self, state: &mut RateState) {
        if let Some(last) = state.last_call_time {
            let elapsed = last.elapsed();
            if elapsed < self.policy.min_interval {
                let wait = self.policy.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiting: spacing calls");
                tokio::time::sleep(wait).await;
            }
        }

        let backoff = self.policy.backoff_for(state.call_count);
        if !backoff.is_zero() {
            debug!(
                call_count = state.call_count,
                wait_ms = backoff.as_millis() as u64,
                "rate limiting: progressive backoff"
            );
            tokio::time::sleep(backoff).await;
        }

        state.call_count += 1;
        state.last_call_time = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule() {
        let policy = RatePolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(4), Duration::ZERO);
        assert_eq!(policy.backoff_for(5), Duration::from_millis(2_500));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(20), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(10));
        assert_eq!(RatePolicy::disabled().backoff_for(5), Duration::ZERO);
    }

    #[test]
    fn policy_from_config() {
        let mut config = AppConfig::default();
        config.rate_limit.min_interval_ms = 250;
        config.rate_limit.backoff_every = 0;
        let policy = RatePolicy::from(&config);
        assert_eq!(policy.min_interval, Duration::from_millis(250));
        assert_eq!(policy.backoff_for(5), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_does_not_wait() {
        let controller = RateController::default();
        let mut state = RateState::new();
        let start = Instant::now();
        controller.before_call(&mut state).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(state.call_count(), 1);
        assert!(state.last_call_time().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced() {
        let controller = RateController::default();
        let mut state = RateState::new();
        controller.before_call(&mut state).await;

        let mut previous = state.last_call_time().unwrap();
        for _ in 0..3 {
            controller.before_call(&mut state).await;
            let now = state.last_call_time().unwrap();
            assert!(now - previous >= Duration::from_secs(2));
            previous = now;
        }
        assert_eq!(state.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn no_spacing_wait_after_idle_gap() {
        let controller = RateController::default();
        let mut state = RateState::new();
        controller.before_call(&mut state).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        let start = Instant::now();
        controller.before_call(&mut state).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn every_fifth_call_backs_off() {
        let controller = RateController::default();
        let mut state = RateState::new();
        for _ in 0..5 {
            controller.before_call(&mut state).await;
        }

        let before = state.last_call_time().unwrap();
        controller.before_call(&mut state).await;
        let gap = state.last_call_time().unwrap() - before;
        // 2s spacing followed by the 5 * 500ms progressive pause
        assert!(gap >= Duration::from_millis(4_500), "gap was {gap:?}");
        assert_eq!(state.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_never_waits() {
        let controller = RateController::new(RatePolicy::disabled());
        let mut state = RateState::new();
        let start = Instant::now();
        for _ in 0..12 {
            controller.before_call(&mut state).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(state.call_count(), 12);
    }
}
