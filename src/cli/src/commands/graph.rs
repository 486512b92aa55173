//! `graph` command: validate the declaration and print startup stages.

use anyhow::Result;
use serde::Serialize;
use stackup_core::graph::ServiceGraph;
use stackup_core::report::exit;
use std::path::Path;
use tabled::Tabled;

use crate::commands::config;
use crate::output::{self, OutputFormat};

/// One node of one stage.
#[derive(Tabled, Serialize)]
struct StageRow {
    #[tabled(rename = "Stage")]
    stage: usize,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Probe")]
    probe: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Depends On")]
    depends_on: String,
    #[tabled(rename = "Action")]
    action: String,
}

pub fn execute(path: Option<&Path>, format: OutputFormat) -> Result<i32> {
    let cfg = config::load(path)?;
    let graph = ServiceGraph::from_config(&cfg)?;
    let stages = graph.stages()?;

    let rows: Vec<StageRow> = stages
        .iter()
        .enumerate()
        .flat_map(|(stage, ids)| ids.iter().map(move |id| (stage, id)))
        .filter_map(|(stage, id)| graph.node(id).map(|node| (stage, node)))
        .map(|(stage, node)| StageRow {
            stage,
            node: node.id.to_string(),
            probe: node.probe.kind_name().to_string(),
            target: node.probe.target(),
            depends_on: node
                .depends_on
                .iter()
                .map(|dep| dep.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            action: node
                .action
                .as_ref()
                .map(|action| action.program().to_string())
                .unwrap_or_default(),
        })
        .collect();

    if !format.is_structured() {
        output::print_header(&format!(
            "Startup plan: {} node(s) in {} stage(s)",
            graph.len(),
            stages.len()
        ));
    }
    output::print_list(&rows, format)?;

    Ok(exit::SUCCESS)
}
