use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::cloud::{HealthState, LoadBalancerApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    TimedOut,
}

/// Polls a load balancer target group until one of its targets is healthy.
#[derive(Clone)]
pub struct HealthPoller {
    lb: Arc<dyn LoadBalancerApi>,
}

impl HealthPoller {
    pub fn new(lb: Arc<dyn LoadBalancerApi>) -> Self {
        Self { lb }
    }

    async fn poll(&self, target_group: &str, budget: Duration) -> HealthState {
        match timeout(budget, self.lb.target_health(target_group)).await {
            Ok(Ok(states)) => {
                debug!(target_group, ?states, "target health");
                if states.contains(&HealthState::Healthy) {
                    HealthState::Healthy
                } else if states.contains(&HealthState::Unhealthy) {
                    HealthState::Unhealthy
                } else {
                    HealthState::Unknown
                }
            }
            Ok(Err(e)) => {
                warn!(target_group, error = %e, "target health query failed");
                HealthState::Unknown
            }
            Err(_) => {
                warn!(target_group, "target health query timed out");
                HealthState::Unknown
            }
        }
    }

    /// Anything but healthy counts as not ready yet. Never waits past `limit`.
    pub async fn wait_until_healthy(
        &self,
        target_group: &str,
        poll_interval: Duration,
        limit: Duration,
    ) -> HealthOutcome {
        let deadline = super::deadline_after(limit);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let state = self.poll(target_group, remaining.max(Duration::from_millis(1))).await;
            if state == HealthState::Healthy {
                info!(target_group, attempt, "load balancer target healthy");
                return HealthOutcome::Healthy;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(target_group, attempt, ?limit, "no healthy target before the deadline");
                return HealthOutcome::TimedOut;
            }
            debug!(target_group, attempt, %state, "waiting for a healthy target");
            sleep(poll_interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::cloud::{CloudError, MockLoadBalancerApi};

    use super::*;

    const POLL: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn healthy_after_a_few_polls_test() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut lb = MockLoadBalancerApi::new();
        lb.expect_target_health().returning(move |_| {
            Ok(match c.fetch_add(1, Ordering::SeqCst) {
                0 => vec![],
                1 => vec![HealthState::Unknown],
                2 => vec![HealthState::Unhealthy],
                _ => vec![HealthState::Unhealthy, HealthState::Healthy],
            })
        });
        let poller = HealthPoller::new(Arc::new(lb));
        let outcome = poller
            .wait_until_healthy("tg", POLL, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, HealthOutcome::Healthy);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_healthy_times_out_test() {
        let mut lb = MockLoadBalancerApi::new();
        lb.expect_target_health()
            .returning(|_| Ok(vec![HealthState::Unknown, HealthState::Unhealthy]));
        let poller = HealthPoller::new(Arc::new(lb));
        let limit = Duration::from_millis(60);
        let started = std::time::Instant::now();
        let outcome = poller.wait_until_healthy("tg", POLL, limit).await;
        assert_eq!(outcome, HealthOutcome::TimedOut);
        assert!(started.elapsed() >= limit);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn query_errors_keep_polling_test() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut lb = MockLoadBalancerApi::new();
        lb.expect_target_health().returning(move |_| {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CloudError::InvalidResponse {
                    api: "elbv2".to_owned(),
                    reason: "throttled".to_owned(),
                })
            } else {
                Ok(vec![HealthState::Healthy])
            }
        });
        let poller = HealthPoller::new(Arc::new(lb));
        assert_eq!(
            poller
                .wait_until_healthy("tg", POLL, Duration::from_secs(5))
                .await,
            HealthOutcome::Healthy
        );
    }
}
