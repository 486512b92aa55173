//! Progress events emitted during a run.

use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::graph::NodeId;
use crate::report::Outcome;

/// Events emitted during orchestration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// Run started; `order` is the report order
    RunStarted { run_id: Uuid, order: Vec<NodeId> },
    /// All dependencies of the node are ready; probing begins
    NodeWaiting {
        node: NodeId,
        target: String,
        max_attempts: u32,
    },
    /// A probe attempt did not report ready
    AttemptFailed {
        node: NodeId,
        attempt: u32,
        max_attempts: u32,
        detail: String,
        fatal: bool,
    },
    /// The node's probe succeeded
    NodeReady {
        node: NodeId,
        attempts: u32,
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
    /// The node's one-shot action is starting
    ActionStarted { node: NodeId, program: String },
    /// The node's one-shot action finished
    ActionFinished {
        node: NodeId,
        success: bool,
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
    /// The node reached its terminal outcome
    NodeFinished { node: NodeId, outcome: Outcome },
    /// Run completed
    RunFinished {
        run_id: Uuid,
        success: bool,
        duration_ms: u64,
    },
}

impl OrchestrationEvent {
    /// The node an event refers to, if any.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::NodeWaiting { node, .. }
            | Self::AttemptFailed { node, .. }
            | Self::NodeReady { node, .. }
            | Self::ActionStarted { node, .. }
            | Self::ActionFinished { node, .. }
            | Self::NodeFinished { node, .. } => Some(node),
            Self::RunStarted { .. } | Self::RunFinished { .. } => None,
        }
    }
}
