//! Bounded retry policy for service applies.
//!
//! Only service resources are retried. Every other kind gets exactly one
//! attempt.

use std::time::Duration;

use crate::types::config::BackoffStrategy;
use crate::types::resource::ResourceKind;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy, base_delay_ms: u64) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            strategy,
            base_delay_ms,
        }
    }

    /// A policy that never waits. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy::new(max_attempts, BackoffStrategy::Fixed, 0)
    }

    /// Attempt budget for a resource kind.
    pub fn attempts_for(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Service => self.max_attempts,
            _ => 1,
        }
    }

    /// Delay before retry number `retry` (0 is the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let ms = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(retry as u64 + 1),
            BackoffStrategy::Exponential => {
                self.base_delay_ms.saturating_mul(2u64.saturating_pow(retry))
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, fixed 500ms wait.
    fn default() -> Self {
        RetryPolicy::new(3, BackoffStrategy::Fixed, 500)
    }
}
