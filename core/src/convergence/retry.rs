//! Retry policy for transient control-plane failures.
//!
//! Only `ProviderError::Transient` is retried, and only within one node's
//! upsert. A node that exhausts its budget fails the pass; retrying the whole
//! apply is the caller's decision.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::node::NodeId;
use crate::types::config::BackoffStrategy;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How many times a failed request is retried and how long to wait between
/// attempts. `max_retries` counts retries, not attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_strategy: BackoffStrategy,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_strategy: BackoffStrategy, base_delay_ms: u64) -> Self {
        RetryPolicy {
            max_retries,
            backoff_strategy,
            base_delay_ms,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        RetryPolicy::new(0, BackoffStrategy::Fixed, 0)
    }

    /// Whether another attempt is allowed after `failures` failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }

    /// Delay before retry number `retry` (0 is the first retry).
    pub fn delay_ms(&self, retry: u32) -> u64 {
        match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(retry as u64 + 1),
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(retry)),
        }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.delay_ms(retry))
    }
}

impl Default for RetryPolicy {
    /// 3 retries, exponential backoff from 2s.
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeRetryTracker
// ---------------------------------------------------------------------------

/// Failure counts per node for the current pass.
#[derive(Debug, Clone)]
pub struct NodeRetryTracker {
    policy: RetryPolicy,
    failures: HashMap<NodeId, u32>,
}

impl NodeRetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        NodeRetryTracker {
            policy,
            failures: HashMap::new(),
        }
    }

    /// Record a failure and return the node's failure count.
    pub fn record_failure(&mut self, node: &NodeId) -> u32 {
        let count = self.failures.entry(node.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&mut self, node: &NodeId) {
        self.failures.remove(node);
    }

    pub fn can_retry(&self, node: &NodeId) -> bool {
        self.policy.should_retry(self.failure_count(node))
    }

    /// Delay before the next attempt on this node. Zero before any failure.
    pub fn next_delay(&self, node: &NodeId) -> Duration {
        match self.failure_count(node) {
            0 => Duration::ZERO,
            n => self.policy.delay(n - 1),
        }
    }

    pub fn failure_count(&self, node: &NodeId) -> u32 {
        self.failures.get(node).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base_delay_ms, 2000);
        assert_eq!(p.backoff_strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn retries_counted_after_first_attempt() {
        let p = RetryPolicy::new(2, BackoffStrategy::Fixed, 0);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
        assert!(!RetryPolicy::none().should_retry(1));
    }

    #[test]
    fn backoff_strategies() {
        let fixed = RetryPolicy::new(5, BackoffStrategy::Fixed, 500);
        assert_eq!(fixed.delay_ms(4), 500);
        let linear = RetryPolicy::new(5, BackoffStrategy::Linear, 1000);
        assert_eq!(linear.delay_ms(2), 3000);
        let exp = RetryPolicy::new(5, BackoffStrategy::Exponential, 1000);
        assert_eq!(exp.delay_ms(0), 1000);
        assert_eq!(exp.delay_ms(3), 8000);
    }

    #[test]
    fn exponential_delay_saturates() {
        let p = RetryPolicy::new(5, BackoffStrategy::Exponential, u64::MAX / 2);
        assert_eq!(p.delay_ms(10), u64::MAX);
    }

    #[test]
    fn tracker_budget_per_node() {
        let mut t = NodeRetryTracker::new(RetryPolicy::new(1, BackoffStrategy::Fixed, 10));
        let a = NodeId::new("a");
        let b = NodeId::new("b");
        assert_eq!(t.next_delay(&a), Duration::ZERO);
        t.record_failure(&a);
        assert!(t.can_retry(&a));
        assert_eq!(t.next_delay(&a), Duration::from_millis(10));
        t.record_failure(&a);
        assert!(!t.can_retry(&a));
        assert!(t.can_retry(&b));
    }

    #[test]
    fn success_clears_failures() {
        let mut t = NodeRetryTracker::new(RetryPolicy::default());
        let a = NodeId::new("a");
        t.record_failure(&a);
        t.record_success(&a);
        assert_eq!(t.failure_count(&a), 0);
        assert_eq!(t.next_delay(&a), Duration::ZERO);
    }

    #[test]
    fn policy_serde_snake_case() {
        let p = RetryPolicy::new(2, BackoffStrategy::Linear, 250);
        let yaml = serde_yaml::to_string(&p).unwrap();
        assert!(yaml.contains("backoff_strategy: linear"));
        let back: RetryPolicy = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, p);
    }
}
