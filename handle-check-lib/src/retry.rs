//! Retry and proxy rotation for failed probes.
//!
//! Only proxy failures are retried, and only by switching to another proxy
//! from the pool. Every retry consumes one unit of the task's budget.

use crate::error::TransportError;
use crate::proxy::ProxyPool;

/// Decision returned by the retry manager after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the same probe again through `proxy`.
    Retry { proxy: String },
    /// The failure is terminal by nature (timeout, refused connection, ...).
    NotRetryable,
    /// A proxy failure, but there is no pool to rotate through.
    NoPool,
    /// A proxy failure with the task's budget already spent.
    Exhausted,
}

/// Remaining retries of one probe task. Owned by that task alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(retries: u32) -> Self {
        Self { remaining: retries }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Shared, read-only retry policy of a run.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    max_retries: u32,
    pool: ProxyPool,
}

impl RetryManager {
    pub fn new(max_retries: u32, pool: ProxyPool) -> Self {
        Self { max_retries, pool }
    }

    /// A fresh budget for a new probe task.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.max_retries)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    /// Decide what to do after a failed attempt.
    ///
    /// On `Retry`, one unit of `budget` has been consumed.
    pub fn decide(&self, budget: &mut RetryBudget, error: &TransportError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::NotRetryable;
        }
        if budget.remaining == 0 {
            return RetryDecision::Exhausted;
        }

        match self.pool.choose() {
            Some(proxy) => {
                budget.remaining -= 1;
                RetryDecision::Retry {
                    proxy: proxy.to_string(),
                }
            }
            None => RetryDecision::NoPool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(retries: u32) -> RetryManager {
        RetryManager::new(retries, ProxyPool::new(["socks5://10.0.0.1:1080"]))
    }

    #[test]
    fn test_terminal_failures_are_not_retried() {
        let manager = manager(3);
        let mut budget = manager.budget();
        assert_eq!(
            manager.decide(&mut budget, &TransportError::timeout("slow")),
            RetryDecision::NotRetryable
        );
        assert_eq!(
            manager.decide(&mut budget, &TransportError::connection("refused")),
            RetryDecision::NotRetryable
        );
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn test_proxy_failures_consume_budget() {
        let manager = manager(3);
        let mut budget = manager.budget();
        let err = TransportError::proxy("refused");

        for left in (0..3).rev() {
            assert_eq!(
                manager.decide(&mut budget, &err),
                RetryDecision::Retry {
                    proxy: "socks5://10.0.0.1:1080".to_string()
                }
            );
            assert_eq!(budget.remaining(), left);
        }
        assert_eq!(manager.decide(&mut budget, &err), RetryDecision::Exhausted);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_no_pool_means_no_retry() {
        let manager = RetryManager::new(3, ProxyPool::default());
        let mut budget = manager.budget();
        assert_eq!(
            manager.decide(&mut budget, &TransportError::proxy("refused")),
            RetryDecision::NoPool
        );
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn test_zero_budget() {
        let manager = manager(0);
        let mut budget = manager.budget();
        assert_eq!(
            manager.decide(&mut budget, &TransportError::proxy("refused")),
            RetryDecision::Exhausted
        );
    }
}
