//! Rate controller for pacing fetches against the source
//!
//! This module handles:
//! - Classifying fetch outcomes into the four kinds the session reacts to
//! - Jittered delays between pages
//! - Periodic long breaks every N pages, N drawn once per session
//! - Tiered backoff after rate-limit signals
//! - The `Clock` seam the session sleeps through

use crate::config::PacingConfig;
use crate::crawler::{FetchError, Page};
use crate::state::SessionState;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// What a fetch attempt amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    TransientError { recoverable: bool },
    FatalError,
}

/// Classifies the result of a fetch attempt
pub fn classify<R>(result: &Result<Page<R>, FetchError>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(FetchError::RateLimited(_)) => Outcome::RateLimited,
        Err(FetchError::Transient { recoverable, .. }) => Outcome::TransientError {
            recoverable: *recoverable,
        },
        Err(FetchError::Fatal(_)) => Outcome::FatalError,
    }
}

/// Why the session is waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// Ordinary jittered gap between pages
    Regular,
    /// The periodic long break
    LongBreak,
    /// Waiting out a rate limit; `tier` is the index into the backoff tiers
    Backoff { tier: usize },
}

/// A wait the session must perform before its next fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pause {
    pub kind: PauseKind,
    pub duration: Duration,
}

/// Pacing parameters in their runtime form
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    pub base_delay: Duration,
    pub jitter: f64,
    pub long_break_every_min: u32,
    pub long_break_every_max: u32,
    pub long_break_min: Duration,
    pub long_break_span: Duration,
    pub backoff_tiers: Vec<Duration>,
}

impl PacingPolicy {
    /// Builds the policy from configuration
    pub fn from_config(config: &PacingConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: config.jitter,
            long_break_every_min: config.long_break_every_min,
            long_break_every_max: config.long_break_every_max,
            long_break_min: Duration::from_millis(config.long_break_min_ms),
            long_break_span: Duration::from_millis(config.long_break_span_ms),
            backoff_tiers: config
                .backoff_tiers_minutes
                .iter()
                .map(|minutes| Duration::from_secs(minutes * 60))
                .collect(),
        }
    }

    /// Replaces the base delay, keeping everything else
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::from_config(&PacingConfig::default())
    }
}

/// Computes how long to wait between fetches
///
/// One controller belongs to one session. The long-break interval is drawn
/// when the controller is created and stays fixed for the session.
#[derive(Debug)]
pub struct RateController {
    policy: PacingPolicy,
    rng: StdRng,
    long_break_every: u32,
}

impl RateController {
    /// Creates a controller seeded from system entropy
    pub fn new(policy: PacingPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Creates a controller with a fixed seed, for reproducible pacing
    pub fn with_seed(policy: PacingPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: PacingPolicy, mut rng: StdRng) -> Self {
        let drawn = if policy.long_break_every_max > policy.long_break_every_min {
            rng.gen_range(policy.long_break_every_min..policy.long_break_every_max)
        } else {
            policy.long_break_every_min
        };

        Self {
            policy,
            rng,
            long_break_every: drawn.max(1),
        }
    }

    /// Pages between long breaks for this session
    pub fn long_break_every(&self) -> u32 {
        self.long_break_every
    }

    /// Returns the policy in use
    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    /// Computes the wait after a successful page
    ///
    /// A long break replaces the regular delay once `long_break_every` pages
    /// have been fetched since the last one. The caller resets the counter.
    pub fn next_delay(&mut self, state: &SessionState) -> Pause {
        if state.pages_since_break >= self.long_break_every {
            let extra = self.policy.long_break_span.mul_f64(self.rng.gen::<f64>());
            return Pause {
                kind: PauseKind::LongBreak,
                duration: self.policy.long_break_min + extra,
            };
        }

        // D*(1-j) + r*2jD, uniform over [D(1-j), D(1+j))
        let base = self.policy.base_delay;
        let jitter = self.policy.jitter;
        let r: f64 = self.rng.gen();
        let duration = base.mul_f64(1.0 - jitter) + base.mul_f64(r * 2.0 * jitter);

        Pause {
            kind: PauseKind::Regular,
            duration,
        }
    }

    /// Computes the backoff after a rate-limit signal
    ///
    /// # Arguments
    ///
    /// * `observed` - Rate-limit events seen earlier in this session
    ///
    /// # Returns
    ///
    /// The tier at index `observed`, capped at the last tier
    pub fn backoff_delay(&self, observed: u32) -> Pause {
        let tiers = &self.policy.backoff_tiers;
        if tiers.is_empty() {
            return Pause {
                kind: PauseKind::Backoff { tier: 0 },
                duration: Duration::ZERO,
            };
        }

        let tier = (observed as usize).min(tiers.len() - 1);
        Pause {
            kind: PauseKind::Backoff { tier },
            duration: tiers[tier],
        }
    }
}

/// Source of delays for a session
///
/// Production sessions sleep on the tokio timer; tests substitute a clock
/// that records requested waits and returns immediately.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
