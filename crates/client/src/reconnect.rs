//! Reconnect scheduling.
//!
//! The policy is plain data and the counter is a small state machine, so the
//! whole schedule can be checked without a socket or a clock. The actual wait
//! goes through [`Sleeper`].

use std::time::Duration;

use async_trait::async_trait;

/// Close code of a deliberate, clean shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code used when the connection dropped or never came up
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when the peer closed without a status
pub const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub step: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl ReconnectPolicy {
    pub const fn new(max_attempts: u32, step: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            step,
            max_delay,
        }
    }

    /// Linear backoff: `min(attempt * step, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then try again. `attempt` counts from 1.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted; stay closed until the user acts.
    GiveUp,
    /// Clean close or nothing selected; no reconnect wanted.
    Stay,
}

/// Attempt counter driven by socket open/close events
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A socket opened; the next failure starts a fresh schedule.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn on_close(&mut self, code: u16, selected: bool) -> ReconnectDecision {
        if code == NORMAL_CLOSURE || !selected {
            return ReconnectDecision::Stay;
        }
        if self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }
}

/// Source of backoff waits. Swapped out in tests so no test sleeps for real.
#[async_trait]
pub trait Sleeper: Send + Sync + 'static {
    async fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
