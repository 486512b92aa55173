//! Startup orchestrator - brings the declared stack up in dependency order.
//!
//! The `Orchestrator` is responsible for:
//! - Rejecting invalid declarations before anything is probed
//! - Waiting on every node once all of its dependencies are ready
//! - Running one-shot actions exactly once per run
//! - Propagating cancellation to in-flight waits and actions
//! - Collecting one outcome per node into a deterministic report

mod events;

pub use events::OrchestrationEvent;

use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::action::{ActionError, ActionRunner, ProcessActionRunner};
use crate::error::Result;
use crate::graph::{Node, NodeId, ServiceGraph};
use crate::probe::{NetworkProbeFactory, ProbeFactory, ReadinessProbe};
use crate::report::{FailurePhase, HealthReport, NodeReport, Outcome};
use crate::retry::{RetryPolicy, RetryWaiter};
use crate::telemetry::metrics::NodeMetrics;

/// Default capacity of the progress event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

type NodeFuture<'a> = Shared<BoxFuture<'a, NodeReport>>;

/// Runs a [`ServiceGraph`] to completion.
pub struct Orchestrator {
    graph: Arc<ServiceGraph>,

    /// Policy for nodes without their own
    default_policy: RetryPolicy,

    /// Built on first run when not injected
    probe_factory: Option<Arc<dyn ProbeFactory>>,

    action_runner: Arc<dyn ActionRunner>,

    cancel: CancellationToken,

    /// Event broadcaster
    event_sender: broadcast::Sender<OrchestrationEvent>,
}

impl Orchestrator {
    /// Create an orchestrator using network probes and process actions.
    pub fn new(graph: ServiceGraph, default_policy: RetryPolicy) -> Self {
        let (event_sender, _) = broadcast::channel(DEFAULT_EVENT_BUFFER);

        Self {
            graph: Arc::new(graph),
            default_policy,
            probe_factory: None,
            action_runner: Arc::new(ProcessActionRunner::new()),
            cancel: CancellationToken::new(),
            event_sender,
        }
    }

    pub fn with_probe_factory(mut self, factory: Arc<dyn ProbeFactory>) -> Self {
        self.probe_factory = Some(factory);
        self
    }

    pub fn with_action_runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.action_runner = runner;
        self
    }

    /// Use `token` to abort the run from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Resize the event channel. Receivers obtained before this call are
    /// detached.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity.max(1));
        self.event_sender = event_sender;
        self
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.event_sender.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn graph(&self) -> &ServiceGraph {
        &self.graph
    }

    /// Bring the stack up.
    ///
    /// Returns `Err` only for configuration errors (cycle, dangling
    /// dependency, invalid policy), before any probe is built. Every other
    /// failure is recorded as a node outcome.
    pub async fn run(&self) -> Result<HealthReport> {
        let order = self.graph.topological_order()?;
        self.default_policy.validate()?;
        for node in self.graph.nodes() {
            if let Some(policy) = &node.retry {
                policy.validate().map_err(|e| e.with_context("node", node.id.as_str()))?;
            }
        }

        let factory: Arc<dyn ProbeFactory> = match &self.probe_factory {
            Some(factory) => factory.clone(),
            None => Arc::new(NetworkProbeFactory::new()?),
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(run_id = %run_id, nodes = order.len(), "Starting orchestration run");
        self.emit_event(OrchestrationEvent::RunStarted {
            run_id,
            order: order.clone(),
        });

        let nodes: Vec<&Node> = order.iter().filter_map(|id| self.graph.node(id)).collect();

        // Probes are built up front so a bad declaration surfaces at once
        let probes: HashMap<&NodeId, std::result::Result<Arc<dyn ReadinessProbe>, String>> = nodes
            .iter()
            .map(|&node| {
                let probe = factory.build(node).map_err(|e| {
                    e.log();
                    match e.internal_message() {
                        Some(reason) => format!("{}: {}", e.user_message(), reason),
                        None => e.user_message().to_string(),
                    }
                });
                (&node.id, probe)
            })
            .collect();

        let mut futures: HashMap<&NodeId, NodeFuture<'_>> = HashMap::with_capacity(nodes.len());
        for &node in &nodes {
            // Dependencies precede the node in topological order
            let deps: Vec<NodeFuture<'_>> = node
                .depends_on
                .iter()
                .filter_map(|dep| futures.get(dep).cloned())
                .collect();
            let probe = probes
                .get(&node.id)
                .cloned()
                .unwrap_or_else(|| Err("probe was not built".to_string()));

            let future = async move {
                let upstream = join_all(deps).await;

                let mut blocked_by: Vec<NodeId> = Vec::new();
                for report in upstream.iter().filter(|r| !r.outcome.is_ready()) {
                    if !blocked_by.contains(&report.node) {
                        blocked_by.push(report.node.clone());
                    }
                }

                if blocked_by.is_empty() {
                    self.resolve(node, probe).await
                } else {
                    self.skip(node, blocked_by)
                }
            }
            .boxed()
            .shared();

            futures.insert(&node.id, future);
        }

        // Collected in topological order regardless of completion order
        let reports = join_all(nodes.iter().filter_map(|node| futures.get(&node.id).cloned())).await;

        let report = HealthReport::from_outcomes(run_id, started_at, Utc::now(), reports);

        info!(
            run_id = %run_id,
            success = report.success(),
            ready = report.summary().ready,
            total = report.summary().total,
            duration_ms = report.duration_ms(),
            "Orchestration run finished"
        );
        self.emit_event(OrchestrationEvent::RunFinished {
            run_id,
            success: report.success(),
            duration_ms: report.duration_ms(),
        });

        Ok(report)
    }

    /// Wait for a node whose dependencies are all ready, then run its action.
    async fn resolve(
        &self,
        node: &Node,
        probe: std::result::Result<Arc<dyn ReadinessProbe>, String>,
    ) -> NodeReport {
        let start = Instant::now();

        let probe = match probe {
            Ok(probe) => probe,
            Err(detail) => {
                let outcome = Outcome::ActionFailed {
                    phase: FailurePhase::Setup,
                    detail,
                };
                return self.finish(node, outcome, 0, start);
            }
        };

        let policy = node.policy(&self.default_policy);
        self.emit_event(OrchestrationEvent::NodeWaiting {
            node: node.id.clone(),
            target: probe.target(),
            max_attempts: policy.max_attempts,
        });
        info!(node = %node.id, probe = probe.name(), target = %probe.target(), "Waiting for node");

        let waiter = RetryWaiter::new(self.cancel.clone()).with_events(self.event_sender.clone());
        let waited = waiter.wait_until_ready(&node.id, probe.as_ref(), policy).await;

        if !waited.outcome.is_ready() {
            return self.finish(node, waited.outcome, waited.attempts, start);
        }

        self.emit_event(OrchestrationEvent::NodeReady {
            node: node.id.clone(),
            attempts: waited.attempts,
            elapsed: waited.elapsed,
        });

        let Some(action) = &node.action else {
            return self.finish(node, Outcome::Ready, waited.attempts, start);
        };

        self.emit_event(OrchestrationEvent::ActionStarted {
            node: node.id.clone(),
            program: action.program().to_string(),
        });
        let action_start = Instant::now();

        let result = self.action_runner.run(&node.id, action, &self.cancel).await;

        self.emit_event(OrchestrationEvent::ActionFinished {
            node: node.id.clone(),
            success: result.is_ok(),
            elapsed: action_start.elapsed(),
        });

        let outcome = match result {
            Ok(_) => Outcome::Ready,
            Err(ActionError::Cancelled) => Outcome::Cancelled,
            Err(ActionError::Failed(detail)) => {
                warn!(node = %node.id, error = %detail, "One-shot action failed");
                Outcome::ActionFailed {
                    phase: FailurePhase::Action,
                    detail,
                }
            }
        };

        self.finish(node, outcome, waited.attempts, start)
    }

    fn skip(&self, node: &Node, blocked_by: Vec<NodeId>) -> NodeReport {
        info!(node = %node.id, blocked_by = ?blocked_by, "Skipping node");
        self.finish(node, Outcome::Skipped { blocked_by }, 0, Instant::now())
    }

    fn finish(&self, node: &Node, outcome: Outcome, attempts: u32, start: Instant) -> NodeReport {
        let elapsed = start.elapsed();
        NodeMetrics::record_outcome(node.id.as_str(), &outcome, elapsed);

        match &outcome {
            Outcome::Ready => info!(node = %node.id, attempts, "Node ready"),
            Outcome::Skipped { .. } => {}
            other => warn!(node = %node.id, attempts, outcome = %other, "Node not ready"),
        }

        self.emit_event(OrchestrationEvent::NodeFinished {
            node: node.id.clone(),
            outcome: outcome.clone(),
        });

        NodeReport::new(node.id.clone(), outcome, attempts, elapsed.as_millis() as u64)
    }

    fn emit_event(&self, event: OrchestrationEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.event_sender.send(event);
    }
}
