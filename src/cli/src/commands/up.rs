//! `up` command: run the startup sequence and report.
//!
//! Progress lines go to stdout in table mode and to stderr when stdout is
//! reserved for a JSON/YAML report.

use anyhow::Result;
use clap::Args;
use colored::*;
use stackup_core::config::parse_duration;
use stackup_core::graph::ServiceGraph;
use stackup_core::orchestrator::{OrchestrationEvent, Orchestrator};
use stackup_core::report::exit;
use stackup_core::telemetry::init_telemetry;
use stackup_core::{Outcome, StackupError};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::config;
use crate::output::{self, OutputFormat};

#[derive(Args, Default)]
pub struct UpArgs {
    /// Overall deadline for the run, e.g. `5m` (overrides run.deadline)
    #[arg(long, value_parser = parse_duration)]
    deadline: Option<Duration>,

    /// Suppress progress lines
    #[arg(short, long)]
    quiet: bool,
}

/// Why the run was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Signal,
    Deadline(Duration),
}

pub async fn execute(args: UpArgs, path: Option<&Path>, format: OutputFormat) -> Result<i32> {
    let cfg = config::load(path)?;
    let telemetry = init_telemetry(&cfg.telemetry())?;

    let graph = ServiceGraph::from_config(&cfg)?;
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(graph, cfg.retry.clone())
        .with_cancellation(cancel.clone())
        .with_event_buffer(cfg.run.event_buffer);

    let printer = (!args.quiet).then(|| spawn_progress(orchestrator.subscribe(), format));
    let deadline = args.deadline.or(cfg.run.deadline);
    let (reason_tx, mut reason_rx) = oneshot::channel();
    let watchdog = tokio::spawn(watch_interrupts(cancel.clone(), deadline, reason_tx));

    let result = orchestrator.run().await;

    watchdog.abort();
    let interrupt = reason_rx.try_recv().ok();

    // Closing the channel lets the printer drain and exit
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let report = result?;

    if let Err(e) = telemetry.flush() {
        tracing::warn!(error = %e, "Failed to write metrics textfile");
    }

    output::print_report(&report, format)?;

    let code = match interrupt {
        Some(Interrupt::Signal) => {
            output::print_error(StackupError::run_cancelled().user_message());
            exit::INTERRUPTED
        }
        Some(Interrupt::Deadline(deadline)) if !report.success() => {
            output::print_error(StackupError::deadline_exceeded(deadline).user_message());
            exit::FAILURE
        }
        _ => report.exit_code(),
    };

    Ok(code)
}

/// Cancel the run on Ctrl-C or when `deadline` passes. The reason is sent
/// before the token is cancelled.
async fn watch_interrupts(
    cancel: CancellationToken,
    deadline: Option<Duration>,
    reason: oneshot::Sender<Interrupt>,
) {
    let expiry = async {
        match deadline {
            Some(deadline) => {
                tokio::time::sleep(deadline).await;
                deadline
            }
            None => std::future::pending().await,
        }
    };

    let interrupt = tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => Interrupt::Signal,
        deadline = expiry => Interrupt::Deadline(deadline),
    };

    tracing::warn!(reason = ?interrupt, "Cancelling run");
    let _ = reason.send(interrupt);
    cancel.cancel();
}

fn spawn_progress(
    mut events: broadcast::Receiver<OrchestrationEvent>,
    format: OutputFormat,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = progress_line(&event) {
                        if format.is_structured() {
                            eprintln!("{}", line);
                        } else {
                            println!("{}", line);
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Render one event as a progress line.
fn progress_line(event: &OrchestrationEvent) -> Option<String> {
    let line = match event {
        OrchestrationEvent::RunStarted { order, .. } => format!(
            "{} Bringing up {} service(s): {}",
            "[INFO]".blue().bold(),
            order.len(),
            order
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        ),
        OrchestrationEvent::NodeWaiting {
            node,
            target,
            max_attempts,
        } => format!(
            "{} {}: waiting for {} (up to {} attempts)",
            "[WAIT]".cyan().bold(),
            node,
            target,
            max_attempts
        ),
        OrchestrationEvent::AttemptFailed {
            node,
            attempt,
            max_attempts,
            detail,
            fatal,
        } => {
            if *fatal {
                format!("{} {}: {}", "[FAIL]".red().bold(), node, detail)
            } else {
                format!(
                    "{} {}: attempt {}/{} not ready: {}",
                    "[RETRY]".yellow(),
                    node,
                    attempt,
                    max_attempts,
                    detail
                )
            }
        }
        OrchestrationEvent::NodeReady {
            node,
            attempts,
            elapsed,
        } => format!(
            "{} {} ready after {} attempt(s) ({:.1?})",
            "[OK]".green().bold(),
            node,
            attempts,
            elapsed
        ),
        OrchestrationEvent::ActionStarted { node, program } => {
            format!("{} {}: running {}", "[RUN]".blue().bold(), node, program)
        }
        OrchestrationEvent::ActionFinished {
            node,
            success,
            elapsed,
        } => {
            let status = if *success { "succeeded" } else { "failed" };
            format!(
                "{} {}: action {} ({:.1?})",
                "[RUN]".blue().bold(),
                node,
                status,
                elapsed
            )
        }
        OrchestrationEvent::NodeFinished { node, outcome } => match outcome {
            Outcome::Ready => return None,
            other => format!("{} {}: {}", output::outcome_label(other), node, other.detail()),
        },
        OrchestrationEvent::RunFinished { .. } => return None,
    };
    Some(line)
}
