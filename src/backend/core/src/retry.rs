//! Bounded retry with a constant delay.
//!
//! `RetryPolicy` is plain configuration; `RetryWaiter` drives a probe until it
//! reports ready, the policy is exhausted, the probe reports an unrecoverable
//! error, or the run is cancelled.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, StackupError};
use crate::graph::NodeId;
use crate::orchestrator::OrchestrationEvent;
use crate::probe::{ProbeError, ReadinessProbe};
use crate::report::{FailurePhase, Outcome};
use crate::telemetry::{CredentialRedactor, ProbeMetrics};

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// How long to keep polling a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum probe invocations
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Constant pause between attempts
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Wall-clock bound; no attempt starts after it has passed
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    /// Bound on a single probe call
    #[serde(default = "default_attempt_timeout", with = "humantime_serde")]
    pub attempt_timeout: Duration,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_deadline() -> Duration {
    Duration::from_secs(90)
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
            deadline: default_deadline(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt budget and delay. The deadline is sized
    /// to fit the attempts.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        let budget = delay.saturating_mul(max_attempts);
        Self {
            max_attempts,
            delay,
            deadline: budget.max(default_deadline()),
            attempt_timeout: default_attempt_timeout(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Check the policy bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(StackupError::invalid_configuration(
                "retry.max_attempts must be at least 1",
            ));
        }

        if self.attempt_timeout.is_zero() {
            return Err(StackupError::invalid_configuration(
                "retry.attempt_timeout must be greater than zero",
            ));
        }

        let budget = self.delay.saturating_mul(self.max_attempts);
        if budget > self.deadline.saturating_mul(2) {
            return Err(StackupError::invalid_configuration(format!(
                "retry budget ({} x {:?} = {:?}) exceeds twice the deadline ({:?})",
                self.max_attempts, self.delay, budget, self.deadline
            ))
            .with_context("max_attempts", self.max_attempts)
            .with_context("delay_ms", self.delay.as_millis() as u64)
            .with_context("deadline_ms", self.deadline.as_millis() as u64));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Waiter
// ═══════════════════════════════════════════════════════════════════════════════

/// Terminal result of waiting on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Ready, TimedOut, ActionFailed (probe phase) or Cancelled
    pub outcome: Outcome,
    /// Probe invocations made
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Polls a probe under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryWaiter {
    cancel: CancellationToken,
    events: Option<broadcast::Sender<OrchestrationEvent>>,
}

impl RetryWaiter {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            events: None,
        }
    }

    /// Report failed attempts on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<OrchestrationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Poll `probe` until it reports ready or the policy gives up.
    pub async fn wait_until_ready(
        &self,
        node: &NodeId,
        probe: &dyn ReadinessProbe,
        policy: &RetryPolicy,
    ) -> WaitOutcome {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break Outcome::Cancelled;
            }

            attempts += 1;
            ProbeMetrics::record_attempt(node.as_str());

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Outcome::Cancelled,
                result = tokio::time::timeout(policy.attempt_timeout, probe.check()) => result,
            };

            let error = match result {
                Ok(Ok(())) => break Outcome::Ready,
                Ok(Err(error)) => error,
                Err(_) => ProbeError::not_ready(format!(
                    "probe timed out after {:?}",
                    policy.attempt_timeout
                )),
            };

            let detail = CredentialRedactor::global().redact(error.detail());
            self.emit_event(OrchestrationEvent::AttemptFailed {
                node: node.clone(),
                attempt: attempts,
                max_attempts: policy.max_attempts,
                detail: detail.clone(),
                fatal: error.is_fatal(),
            });

            if error.is_fatal() {
                warn!(node = %node, attempt = attempts, error = %detail, "Unrecoverable probe error");
                break Outcome::ActionFailed {
                    phase: FailurePhase::Probe,
                    detail,
                };
            }

            debug!(
                node = %node,
                attempt = attempts,
                max_attempts = policy.max_attempts,
                error = %detail,
                "Not ready yet"
            );

            if attempts >= policy.max_attempts
                || start.elapsed().saturating_add(policy.delay) > policy.deadline
            {
                break Outcome::TimedOut {
                    attempts,
                    last_error: Some(detail),
                };
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Outcome::Cancelled,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        };

        WaitOutcome {
            outcome,
            attempts,
            elapsed: start.elapsed(),
        }
    }

    fn emit_event(&self, event: OrchestrationEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results, then repeats `fallback`.
    struct Scripted {
        script: Mutex<VecDeque<std::result::Result<(), ProbeError>>>,
        fallback: std::result::Result<(), ProbeError>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            script: Vec<std::result::Result<(), ProbeError>>,
            fallback: std::result::Result<(), ProbeError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReadinessProbe for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn target(&self) -> String {
            "scripted".into()
        }

        async fn check(&self) -> std::result::Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn waiter() -> RetryWaiter {
        RetryWaiter::new(CancellationToken::new())
    }

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.delay, Duration::from_secs(2));
        policy.validate().unwrap();
    }

    #[test]
    fn test_policy_validation() {
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero.validate().is_err());

        let oversized = RetryPolicy::default()
            .with_deadline(Duration::from_secs(10));
        let err = oversized.validate().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidConfiguration);

        let no_timeout = RetryPolicy::default().with_attempt_timeout(Duration::ZERO);
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_policy_humantime_serde() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 5,
            "delay": "500ms",
            "deadline": "1m"
        }))
        .unwrap();
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert_eq!(policy.deadline, Duration::from_secs(60));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_call() {
        let probe = Scripted::new(vec![], Ok(()));
        let result = waiter()
            .wait_until_ready(&NodeId::from("store"), &probe, &RetryPolicy::default())
            .await;

        assert_eq!(result.outcome, Outcome::Ready);
        assert_eq!(result.attempts, 1);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let probe = Scripted::new(vec![], Err(ProbeError::not_ready("refused")));
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        let result = waiter()
            .wait_until_ready(&NodeId::from("store"), &probe, &policy)
            .await;

        assert!(matches!(result.outcome, Outcome::TimedOut { attempts: 5, .. }));
        assert_eq!(probe.calls(), 5);
        // Four sleeps between five attempts
        assert!(result.elapsed >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_short_circuits() {
        let probe = Scripted::new(vec![], Err(ProbeError::fatal("auth rejected")));
        let result = waiter()
            .wait_until_ready(&NodeId::from("store"), &probe, &RetryPolicy::default())
            .await;

        assert_eq!(
            result.outcome,
            Outcome::ActionFailed {
                phase: FailurePhase::Probe,
                detail: "auth rejected".into()
            }
        );
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let probe = Scripted::new(vec![], Err(ProbeError::not_ready("refused")));
        let policy = RetryPolicy::new(100, Duration::from_secs(1)).with_deadline(Duration::from_millis(2500));

        let result = waiter()
            .wait_until_ready(&NodeId::from("store"), &probe, &policy)
            .await;

        assert!(matches!(result.outcome, Outcome::TimedOut { .. }));
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_policy_does_not_overflow() {
        let probe = Scripted::new(vec![Err(ProbeError::not_ready("refused"))], Ok(()));
        let policy = RetryPolicy::new(2, Duration::MAX).with_deadline(Duration::MAX);
        policy.validate().unwrap();

        let result = waiter()
            .wait_until_ready(&NodeId::from("store"), &probe, &policy)
            .await;

        assert_eq!(result.outcome, Outcome::Ready);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_counts_as_not_ready() {
        struct Hanging;

        #[async_trait]
        impl ReadinessProbe for Hanging {
            fn name(&self) -> &str {
                "hanging"
            }
            fn target(&self) -> String {
                "nowhere".into()
            }
            async fn check(&self) -> std::result::Result<(), ProbeError> {
                std::future::pending().await
            }
        }

        let policy = RetryPolicy::new(2, Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_millis(50));
        let result = waiter()
            .wait_until_ready(&NodeId::from("app"), &Hanging, &policy)
            .await;

        match result.outcome {
            Outcome::TimedOut { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.unwrap().contains("timed out"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let probe = Scripted::new(vec![], Err(ProbeError::not_ready("refused")));
        let cancel = CancellationToken::new();
        let waiter = RetryWaiter::new(cancel.clone());
        let policy = RetryPolicy::new(10, Duration::from_secs(5));

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let result = waiter
            .wait_until_ready(&NodeId::from("store"), &probe, &policy)
            .await;
        canceller.await.unwrap();

        assert_eq!(result.outcome, Outcome::Cancelled);
        assert_eq!(probe.calls(), 1);
        assert!(result.elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_failed_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let probe = Scripted::new(
            vec![Err(ProbeError::not_ready("starting up"))],
            Ok(()),
        );

        let result = waiter()
            .with_events(tx)
            .wait_until_ready(&NodeId::from("cache"), &probe, &RetryPolicy::default())
            .await;
        assert_eq!(result.outcome, Outcome::Ready);
        assert_eq!(result.attempts, 2);

        match rx.try_recv().unwrap() {
            OrchestrationEvent::AttemptFailed {
                node,
                attempt,
                fatal,
                ..
            } => {
                assert_eq!(node.as_str(), "cache");
                assert_eq!(attempt, 1);
                assert!(!fatal);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
