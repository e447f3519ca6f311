//! Reconnection supervision
//! Bounded exponential backoff with jitter for re-establishing a lost
//! link, and the supervisor loop the session driver hands control to
//! whenever the link drops or degrades past the threshold.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use rand::Rng;

use crate::core::bluetooth::constants::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, RECONNECT_BACKOFF_MULTIPLIER, RECONNECT_INITIAL_DELAY_MS,
    RECONNECT_MAX_DELAY_MS,
};
use crate::core::bluetooth::session::{arm_disconnect_handler, SessionShared};
use crate::core::bluetooth::types::SessionEvent;

/// Backoff policy for reconnection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts before the supervisor gives up.
    pub max_attempts: u32,
    /// Delay before the second attempt; the first is immediate.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub backoff_multiplier: f64,
    /// Whether to spread delays by ±25%.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_delay: Duration::from_millis(RECONNECT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            backoff_multiplier: RECONNECT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before the given 1-based attempt.
    ///
    /// The first attempt is immediate; each later attempt waits
    /// `initial_delay * multiplier^(attempt - 2)`, capped at
    /// `max_delay`. With a multiplier of at least 1.5 the ±25% jitter
    /// keeps successive delays non-decreasing.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2).min(i32::MAX as u32) as i32;
        let mut delay = self
            .initial_delay
            .mul_f64(self.backoff_multiplier.powi(exponent));
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        if self.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }
}

/// How a supervision run ended.
pub(crate) enum ReconnectOutcome {
    Reconnected { attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Try to re-establish the link for a session whose connection was lost.
///
/// The caller has already cancelled the update strategy and released the
/// transport handle; on success the handle is re-armed and the caller
/// restarts the strategy from a clean working snapshot.
pub(crate) async fn run(shared: &Arc<SessionShared>) -> ReconnectOutcome {
    let policy = shared.config.reconnect.clone();
    let mut attempt: u32 = 0;

    while attempt < policy.max_attempts {
        attempt += 1;

        let wait = policy.delay_before(attempt);
        if !wait.is_zero() {
            info!(
                "Waiting {:?} before reconnect attempt {}/{}",
                wait, attempt, policy.max_attempts
            );
            tokio::select! {
                _ = shared.cancel.cancelled() => return ReconnectOutcome::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        shared.emit(SessionEvent::Reconnecting { attempt });
        info!(
            "Reconnect attempt {}/{} for {}",
            attempt, policy.max_attempts, shared.identity.id
        );

        match shared.bounded(shared.transport.connect(&shared.identity)).await {
            Ok(()) => {
                if let Err(e) = arm_disconnect_handler(shared).await {
                    warn!("Reconnected but could not watch the link: {e}");
                    let _ = shared
                        .bounded(shared.transport.disconnect(&shared.identity))
                        .await;
                    continue;
                }
                info!("Reconnected to {} on attempt {}", shared.identity.id, attempt);
                return ReconnectOutcome::Reconnected { attempts: attempt };
            }
            Err(e) => {
                warn!("Reconnect attempt {} failed: {e}", attempt);
            }
        }
    }

    warn!(
        "Giving up on {} after {} reconnect attempts",
        shared.identity.id, policy.max_attempts
    );
    ReconnectOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn first_attempt_is_immediate() {
        assert_eq!(policy(false).delay_before(1), Duration::ZERO);
    }

    #[test]
    fn delays_double_per_attempt() {
        let policy = policy(false);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
        assert_eq!(policy.delay_before(5), Duration::from_millis(800));
    }

    #[test]
    fn delays_are_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 20,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_before(12), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let policy = policy(true);
        for _ in 0..100 {
            let delay = policy.delay_before(3);
            assert!(delay >= Duration::from_millis(150));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn jittered_delays_never_decrease() {
        let policy = policy(true);
        for _ in 0..100 {
            let mut previous = Duration::ZERO;
            for attempt in 1..=5 {
                let delay = policy.delay_before(attempt);
                assert!(delay >= previous, "attempt {attempt} shrank the delay");
                previous = delay;
            }
        }
    }
}
