//! Resource state policies
//!
//! A policy is told about every request outcome for one resource and decides
//! whether callers should treat that resource as down.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use stowage_common::config::ClusterMapConfig;
use stowage_common::{Clock, SystemClock};
use tracing::{error, info};

/// Decides whether a resource is available
pub trait ResourceStatePolicy: Send + Sync {
    /// Record a failed request
    fn on_error(&self);

    /// Record a successful request
    fn on_success(&self);

    /// Whether requests should avoid the resource right now
    fn is_down(&self) -> bool;

    /// Whether the resource was administratively taken out of service
    fn is_hard_down(&self) -> bool;
}

/// Marks a resource down for a fixed backoff after consecutive failures
///
/// The failure count is only reset by a success. Once the backoff lapses the
/// resource looks up again, but a single further failure puts it straight
/// back down: it has to answer a request to become fully available.
pub struct FixedBackoffResourceStatePolicy {
    resource: String,
    hard_down: bool,
    failure_count: AtomicU32,
    failure_threshold: u32,
    retry_backoff: Duration,
    down_until_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl FixedBackoffResourceStatePolicy {
    /// Create a policy for `resource`
    pub fn new(
        resource: impl Into<String>,
        hard_down: bool,
        failure_threshold: u32,
        retry_backoff: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resource: resource.into(),
            hard_down,
            failure_count: AtomicU32::new(0),
            failure_threshold,
            retry_backoff,
            down_until_ms: AtomicU64::new(0),
            clock,
        }
    }

    /// Create a policy from configuration, on the wall clock
    pub fn from_config(resource: impl Into<String>, hard_down: bool, config: &ClusterMapConfig) -> Self {
        Self::new(
            resource,
            hard_down,
            config.failure_threshold,
            config.retry_backoff(),
            Arc::new(SystemClock),
        )
    }

    /// Resource this policy tracks
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }
}

impl ResourceStatePolicy for FixedBackoffResourceStatePolicy {
    fn on_error(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if failures >= self.failure_threshold {
            let backoff_ms = u64::try_from(self.retry_backoff.as_millis()).unwrap_or(u64::MAX);
            let until = self.clock.now_ms().saturating_add(backoff_ms);
            self.down_until_ms.store(until, Ordering::Release);
            error!("Resource {} has gone down", self.resource);
        }
    }

    fn on_success(&self) {
        let previous = self.failure_count.swap(0, Ordering::AcqRel);
        if previous >= self.failure_threshold {
            info!("Resource {} responded after {} failures", self.resource, previous);
        }
    }

    fn is_down(&self) -> bool {
        if self.hard_down {
            return true;
        }
        self.failure_count() >= self.failure_threshold
            && self.clock.now_ms() < self.down_until_ms.load(Ordering::Acquire)
    }

    fn is_hard_down(&self) -> bool {
        self.hard_down
    }
}

impl fmt::Debug for FixedBackoffResourceStatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBackoffResourceStatePolicy")
            .field("resource", &self.resource)
            .field("hard_down", &self.hard_down)
            .field("failure_count", &self.failure_count())
            .field("failure_threshold", &self.failure_threshold)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_common::ManualClock;

    const BACKOFF: Duration = Duration::from_secs(10);

    fn policy(hard_down: bool) -> (FixedBackoffResourceStatePolicy, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let policy = FixedBackoffResourceStatePolicy::new("disk-0", hard_down, 3, BACKOFF, clock.clone());
        (policy, clock)
    }

    #[test]
    fn test_down_after_threshold() {
        let (policy, _clock) = policy(false);
        policy.on_error();
        policy.on_error();
        assert!(!policy.is_down());

        policy.on_error();
        assert!(policy.is_down());
        assert!(!policy.is_hard_down());
        assert_eq!(policy.failure_count(), 3);
    }

    #[test]
    fn test_backoff_lapses() {
        let (policy, clock) = policy(false);
        for _ in 0..3 {
            policy.on_error();
        }
        clock.advance(BACKOFF - Duration::from_millis(1));
        assert!(policy.is_down());

        clock.advance(Duration::from_millis(1));
        assert!(!policy.is_down());

        // count survives the lapse, so one more failure is enough
        policy.on_error();
        assert!(policy.is_down());
    }

    #[test]
    fn test_success_resets() {
        let (policy, clock) = policy(false);
        for _ in 0..3 {
            policy.on_error();
        }
        policy.on_success();
        assert!(!policy.is_down());
        assert_eq!(policy.failure_count(), 0);

        clock.advance(BACKOFF * 2);
        policy.on_error();
        policy.on_error();
        assert!(!policy.is_down());
    }

    #[test]
    fn test_hard_down() {
        let (policy, _clock) = policy(true);
        assert!(policy.is_down());
        assert!(policy.is_hard_down());
        policy.on_success();
        assert!(policy.is_down());
    }

    #[test]
    fn test_from_config() {
        let config = ClusterMapConfig {
            failure_threshold: 1,
            retry_backoff_ms: 60_000,
        };
        let policy = FixedBackoffResourceStatePolicy::from_config("node-a", false, &config);
        assert_eq!(policy.resource(), "node-a");
        assert!(!policy.is_down());
        policy.on_error();
        assert!(policy.is_down());
    }

    #[test]
    fn test_shared_across_threads() {
        let (policy, _clock) = policy(false);
        let policy = Arc::new(policy);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || policy.on_error())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(policy.failure_count(), 4);
        assert!(policy.is_down());
    }
}
