//! # Stackup Core
//!
//! Dependency-ordered startup and readiness orchestration for a service stack.
//!
//! ## Architecture
//!
//! - **Graph**: Declared nodes and their dependencies, validated and ordered
//! - **Probes**: TCP, PostgreSQL, Redis and HTTP readiness checks
//! - **Retry**: Bounded attempts with fixed delay, deadline and per-attempt timeout
//! - **Actions**: One-shot steps (schema migration) run once their node is ready
//! - **Orchestrator**: Concurrent, cancellable execution of the whole graph
//! - **Report**: One outcome per node and the process exit code
//! - **Telemetry**: Structured logging and Prometheus metrics

pub mod action;
pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod retry;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, StackupError};
pub use report::{FailurePhase, HealthReport, NodeReport, Outcome};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::action::{ActionRunner, ActionSpec, ProcessActionRunner};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, Result, StackupError};
    pub use crate::graph::{Node, NodeId, ServiceGraph};
    pub use crate::orchestrator::{OrchestrationEvent, Orchestrator};
    pub use crate::probe::{ProbeError, ProbeFactory, ProbeSpec, ReadinessProbe};
    pub use crate::report::{HealthReport, Outcome};
    pub use crate::retry::RetryPolicy;
}
