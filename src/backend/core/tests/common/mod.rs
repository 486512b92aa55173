//! Scripted probes and actions for orchestration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use stackup_core::action::{ActionError, ActionReport, ActionRunner, ActionSpec};
use stackup_core::graph::{Node, NodeId};
use stackup_core::probe::{ProbeError, ProbeFactory, ProbeSpec, ReadinessProbe};
use stackup_core::retry::RetryPolicy;
use stackup_core::{Result, StackupError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one probe call does.
#[derive(Debug, Clone)]
pub enum Step {
    Ready,
    NotReady,
    Fatal(&'static str),
    /// Never returns; only the attempt timeout or cancellation ends it
    Hang,
}

/// A probe replaying a script; the last step repeats forever.
pub struct ScriptedProbe {
    node: NodeId,
    steps: Vec<Step>,
    calls: Arc<AtomicU32>,
    log: Arc<Mutex<Vec<NodeId>>>,
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    fn name(&self) -> &str {
        "scripted"
    }

    fn target(&self) -> String {
        format!("scripted://{}", self.node)
    }

    async fn check(&self) -> std::result::Result<(), ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.log.lock().unwrap().push(self.node.clone());

        let step = self
            .steps
            .get(call)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(Step::Ready);

        match step {
            Step::Ready => Ok(()),
            Step::NotReady => Err(ProbeError::not_ready("connection refused")),
            Step::Fatal(detail) => Err(ProbeError::fatal(detail)),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Hands out scripted probes and counts calls per node.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: HashMap<NodeId, Vec<Step>>,
    calls: Mutex<HashMap<NodeId, Arc<AtomicU32>>>,
    /// Probe calls in the order they happened
    log: Arc<Mutex<Vec<NodeId>>>,
    broken: Vec<NodeId>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, node: &str, steps: Vec<Step>) -> Self {
        self.scripts.insert(NodeId::from(node), steps);
        self
    }

    /// `build` fails for `node`.
    pub fn broken(mut self, node: &str) -> Self {
        self.broken.push(NodeId::from(node));
        self
    }

    pub fn calls(&self, node: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&NodeId::from(node))
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .values()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }

    /// Index of the first probe call on `node`.
    pub fn first_call(&self, node: &str) -> Option<usize> {
        let id = NodeId::from(node);
        self.log.lock().unwrap().iter().position(|n| *n == id)
    }

    /// Index of the last probe call on `node`.
    pub fn last_call(&self, node: &str) -> Option<usize> {
        let id = NodeId::from(node);
        self.log.lock().unwrap().iter().rposition(|n| *n == id)
    }
}

impl ProbeFactory for ScriptedFactory {
    fn build(&self, node: &Node) -> Result<Arc<dyn ReadinessProbe>> {
        if self.broken.contains(&node.id) {
            return Err(StackupError::probe_build_failed(
                node.id.as_str(),
                "invalid URL scheme",
            ));
        }

        let calls = self
            .calls
            .lock()
            .unwrap()
            .entry(node.id.clone())
            .or_default()
            .clone();

        Ok(Arc::new(ScriptedProbe {
            node: node.id.clone(),
            steps: self.scripts.get(&node.id).cloned().unwrap_or_default(),
            calls,
            log: self.log.clone(),
        }))
    }
}

/// What a recorded action does.
#[derive(Debug, Clone)]
pub enum ActionBehavior {
    Succeed,
    Fail(&'static str),
    /// Runs until cancelled
    Hang,
}

/// Records action invocations instead of spawning processes.
pub struct RecordingActionRunner {
    behavior: ActionBehavior,
    runs: Mutex<Vec<NodeId>>,
}

impl RecordingActionRunner {
    pub fn new(behavior: ActionBehavior) -> Self {
        Self {
            behavior,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<NodeId> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionRunner for RecordingActionRunner {
    async fn run(
        &self,
        node: &NodeId,
        _action: &ActionSpec,
        cancel: &CancellationToken,
    ) -> std::result::Result<ActionReport, ActionError> {
        self.runs.lock().unwrap().push(node.clone());

        match &self.behavior {
            ActionBehavior::Succeed => Ok(ActionReport {
                elapsed: Duration::ZERO,
                stdout_tail: String::new(),
            }),
            ActionBehavior::Fail(detail) => Err(ActionError::Failed(detail.to_string())),
            ActionBehavior::Hang => {
                cancel.cancelled().await;
                Err(ActionError::Cancelled)
            }
        }
    }
}

/// A node whose probe is supplied by [`ScriptedFactory`].
pub fn node(id: &str) -> Node {
    Node::new(id, ProbeSpec::tcp("localhost", 1))
}

/// Fast policy for paused-clock tests: `max_attempts` one second apart.
pub fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(1))
}
