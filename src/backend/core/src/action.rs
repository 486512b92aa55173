//! One-shot actions run once a node is ready (e.g. the schema migration).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::graph::NodeId;
use crate::telemetry::CredentialRedactor;

/// Bytes of stderr kept as failure detail.
const STDERR_TAIL_BYTES: usize = 2048;

fn default_action_timeout() -> Duration {
    Duration::from_secs(300)
}

/// A one-shot action, tagged by `kind` in configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    /// External process; success is exit status 0
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
        #[serde(default = "default_action_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

impl ActionSpec {
    /// A command with no extra environment and the default timeout.
    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Command {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: default_action_timeout(),
        }
    }

    /// Program name, for progress output.
    pub fn program(&self) -> &str {
        match self {
            Self::Command { program, .. } => program,
        }
    }

    /// Copy with environment values hidden.
    pub fn redacted(&self) -> Self {
        match self {
            Self::Command {
                program,
                args,
                env,
                working_dir,
                timeout,
            } => Self::Command {
                program: program.clone(),
                args: args.clone(),
                env: env
                    .keys()
                    .map(|k| (k.clone(), crate::config::REDACTED.to_string()))
                    .collect(),
                working_dir: working_dir.clone(),
                timeout: *timeout,
            },
        }
    }
}

// Environment values may hold credentials (DATABASE_URL)
impl std::fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command {
                program,
                args,
                env,
                working_dir,
                timeout,
            } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .field("working_dir", working_dir)
                .field("timeout", timeout)
                .finish(),
        }
    }
}

/// What a successful action produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub elapsed: Duration,
    /// Last lines of stdout, for debugging
    pub stdout_tail: String,
}

/// Why an action did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("action cancelled")]
    Cancelled,
}

/// Executes one-shot actions.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(
        &self,
        node: &NodeId,
        action: &ActionSpec,
        cancel: &CancellationToken,
    ) -> Result<ActionReport, ActionError>;
}

/// Runs [`ActionSpec::Command`] as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessActionRunner;

impl ProcessActionRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionRunner for ProcessActionRunner {
    async fn run(
        &self,
        node: &NodeId,
        action: &ActionSpec,
        cancel: &CancellationToken,
    ) -> Result<ActionReport, ActionError> {
        let ActionSpec::Command {
            program,
            args,
            env,
            working_dir,
            timeout,
        } = action;

        let start = Instant::now();
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        info!(node = %node, program = %program, "Running one-shot action");

        let child = command
            .spawn()
            .map_err(|e| ActionError::Failed(format!("failed to start {}: {}", program, e)))?;

        // Dropping the wait future kills the child
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(node = %node, program = %program, "Action cancelled; killing child");
                return Err(ActionError::Cancelled);
            }
            result = tokio::time::timeout(*timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ActionError::Failed(format!("waiting for {}: {}", program, e)))
                }
                Err(_) => {
                    return Err(ActionError::Failed(format!(
                        "{} did not finish within {:?}",
                        program, timeout
                    )))
                }
            },
        };

        let elapsed = start.elapsed();
        let stdout_tail = tail(&output.stdout);

        if output.status.success() {
            debug!(node = %node, elapsed_ms = elapsed.as_millis() as u64, "Action succeeded");
            return Ok(ActionReport {
                elapsed,
                stdout_tail,
            });
        }

        let status = match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr_tail = CredentialRedactor::global().redact(&tail(&output.stderr));
        let detail = if stderr_tail.is_empty() {
            format!("{} failed with {}", program, status)
        } else {
            format!("{} failed with {}: {}", program, status, stderr_tail)
        };

        Err(ActionError::Failed(detail))
    }
}

/// Last [`STDERR_TAIL_BYTES`] of process output, trimmed.
fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_env_values() {
        let mut env = BTreeMap::new();
        env.insert("DATABASE_URL".to_string(), "postgres://u:hunter2@db/app".to_string());
        let action = ActionSpec::Command {
            program: "migrate".into(),
            args: vec!["up".into()],
            env,
            working_dir: None,
            timeout: Duration::from_secs(60),
        };

        let rendered = format!("{:?}", action);
        assert!(rendered.contains("DATABASE_URL"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", action.redacted()).contains("hunter2"));
    }

    #[test]
    fn test_tail_keeps_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES) + "\nfinal error\n";
        let tail = tail(long.as_bytes());
        assert!(tail.ends_with("final error"));
        assert!(tail.len() <= STDERR_TAIL_BYTES);
    }

    #[test]
    fn test_deserialize_command() {
        let action: ActionSpec = serde_json::from_value(serde_json::json!({
            "kind": "command",
            "program": "alembic",
            "args": ["upgrade", "head"],
            "timeout": "2m"
        }))
        .unwrap();
        assert_eq!(action.program(), "alembic");
        match action {
            ActionSpec::Command { timeout, args, .. } => {
                assert_eq!(timeout, Duration::from_secs(120));
                assert_eq!(args, vec!["upgrade", "head"]);
            }
        }
    }
}
