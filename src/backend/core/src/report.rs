//! Node outcomes and the consolidated health report.
//!
//! This module provides:
//! - `Outcome`: the terminal state of one node in one run
//! - `NodeReport`: an outcome plus attempt count and timing
//! - `HealthReport`: the immutable, ordered result of a run
//!
//! # Outcome Semantics
//!
//! - **Ready**: the probe succeeded and the one-shot action (if any) exited 0
//! - **TimedOut**: the dependency never answered ready within the retry policy
//! - **ActionFailed**: misconfiguration or a failed one-shot action
//! - **Skipped**: a dependency did not reach Ready, so the node was never probed
//! - **Cancelled**: the run was interrupted before the node finished

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

use crate::error::Result;
use crate::graph::NodeId;

/// Process exit codes derived from a run.
pub mod exit {
    /// Every node is Ready.
    pub const SUCCESS: i32 = 0;
    /// At least one node ended in a non-Ready outcome.
    pub const FAILURE: i32 = 1;
    /// The declaration or configuration is invalid; nothing was probed.
    pub const CONFIGURATION: i32 = 2;
    /// The run was interrupted (128 + SIGINT).
    pub const INTERRUPTED: i32 = 130;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an `ActionFailed` outcome originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// The probe could not be constructed
    Setup,
    /// The probe reported an unrecoverable error
    Probe,
    /// The one-shot action failed
    Action,
}

impl std::fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Probe => write!(f, "probe"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// Terminal outcome of a node. Recorded exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ready,
    TimedOut {
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
    },
    ActionFailed {
        phase: FailurePhase,
        detail: String,
    },
    Skipped {
        blocked_by: Vec<NodeId>,
    },
    Cancelled,
}

impl Outcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Stable snake_case label, also used as a metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::TimedOut { .. } => "timed_out",
            Self::ActionFailed { .. } => "action_failed",
            Self::Skipped { .. } => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// One-line detail for humans, empty for Ready and Cancelled.
    pub fn detail(&self) -> String {
        match self {
            Self::Ready | Self::Cancelled => String::new(),
            Self::TimedOut {
                attempts,
                last_error,
            } => match last_error {
                Some(error) => format!("gave up after {} attempts: {}", attempts, error),
                None => format!("gave up after {} attempts", attempts),
            },
            Self::ActionFailed { phase, detail } => format!("{} failed: {}", phase, detail),
            Self::Skipped { blocked_by } => {
                let names: Vec<&str> = blocked_by.iter().map(NodeId::as_str).collect();
                format!("blocked by {}", names.join(", "))
            }
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let detail = self.detail();
        if detail.is_empty() {
            write!(f, "{}", self.label())
        } else {
            write!(f, "{} ({})", self.label(), detail)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Node Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one node plus how it got there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: NodeId,
    pub outcome: Outcome,
    /// Probe invocations made for this node
    pub attempts: u32,
    /// Time from the node becoming eligible to its terminal outcome
    pub duration_ms: u64,
}

impl NodeReport {
    pub fn new(node: NodeId, outcome: Outcome, attempts: u32, duration_ms: u64) -> Self {
        Self {
            node,
            outcome,
            attempts,
            duration_ms,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Consolidated result of a run. Nodes appear in the run's topological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
    nodes: Vec<NodeReport>,
    success: bool,
    summary: ReportSummary,
}

impl HealthReport {
    /// Build the report from per-node results already in report order.
    pub fn from_outcomes(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        nodes: Vec<NodeReport>,
    ) -> Self {
        let summary = ReportSummary::tally(&nodes);
        let success = nodes.iter().all(|n| n.outcome.is_ready());
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            run_id,
            started_at,
            finished_at,
            duration_ms,
            nodes,
            success,
            summary,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn nodes(&self) -> &[NodeReport] {
        &self.nodes
    }

    /// True iff every node is Ready.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    /// Get a specific node's report.
    pub fn get(&self, node: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node.as_str() == node)
    }

    /// Outcome of a node, if it is part of the report.
    pub fn outcome(&self, node: &str) -> Option<&Outcome> {
        self.get(node).map(|n| &n.outcome)
    }

    pub fn was_interrupted(&self) -> bool {
        self.summary.cancelled > 0
    }

    /// Exit code for automation.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            exit::SUCCESS
        } else if self.was_interrupted() {
            exit::INTERRUPTED
        } else {
            exit::FAILURE
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Multi-line human-readable summary.
    pub fn render_summary(&self) -> String {
        let width = self
            .nodes
            .iter()
            .map(|n| n.node.as_str().len())
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Startup report {} ({} ms)",
            self.run_id, self.duration_ms
        );

        for node in &self.nodes {
            let _ = write!(
                out,
                "  {:<13} {:<width$}  {} attempt(s), {} ms",
                format!("[{}]", node.outcome.label()),
                node.node.as_str(),
                node.attempts,
                node.duration_ms,
                width = width,
            );
            let detail = node.outcome.detail();
            if !detail.is_empty() {
                let _ = write!(out, "  {}", detail);
            }
            out.push('\n');
        }

        let verdict = if self.success { "READY" } else { "NOT READY" };
        let _ = write!(
            out,
            "Overall: {} ({}/{} ready)",
            verdict, self.summary.ready, self.summary.total
        );
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Report Summary
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub ready: usize,
    pub timed_out: usize,
    pub action_failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl ReportSummary {
    fn tally(nodes: &[NodeReport]) -> Self {
        let mut summary = Self {
            total: nodes.len(),
            ..Self::default()
        };

        for node in nodes {
            match node.outcome {
                Outcome::Ready => summary.ready += 1,
                Outcome::TimedOut { .. } => summary.timed_out += 1,
                Outcome::ActionFailed { .. } => summary.action_failed += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }

        summary
    }
}
