//! Workflow visualization dump.
//!
//! Writes the task graph as Graphviz DOT to `workflow.gv` and then makes a
//! best-effort attempt to render it with the external `dot` tool. A missing
//! renderer is only a notice; the run continues either way.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::info;

use crate::workflow::Workflow;

/// Render the workflow as a DOT digraph, one node per stage and one edge
/// per prerequisite.
pub fn render_dot(workflow: &Workflow) -> String {
    let index_of = |name: &str| {
        workflow
            .stages
            .iter()
            .position(|stage| stage.name == name)
            .expect("validated workflow references known stages")
    };

    let mut out = String::from("digraph workflow {\n");
    for (id, stage) in workflow.stages.iter().enumerate() {
        out.push_str(&format!("    \"{}\" [label=\"{}\"]\n", id, stage.name));
    }
    for (id, stage) in workflow.stages.iter().enumerate() {
        for dependency in &stage.needs {
            out.push_str(&format!("    \"{}\" -> \"{}\"\n", index_of(dependency), id));
        }
    }
    out.push_str("}\n");
    out
}

/// Write `workflow.gv` (or the given path) and try to render it.
pub fn write_workflow_dot(workflow: &Workflow, path: &Path) -> Result<()> {
    std::fs::write(path, render_dot(workflow))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(graph = %path.display(), "workflow visualization written");
    try_render(path);
    Ok(())
}

/// Best-effort PDF render through the external `dot` tool.
fn try_render(path: &Path) {
    let rendered = path.with_extension("gv.pdf");
    let status = Command::new("dot")
        .arg("-Tpdf")
        .arg(path)
        .arg("-o")
        .arg(&rendered)
        .status();
    match status {
        Ok(status) if status.success() => {
            info!(rendered = %rendered.display(), "workflow rendered");
        }
        Ok(status) => {
            println!("dot exited with {status}; keeping {} only", path.display());
        }
        Err(_) => {
            println!(
                "graphviz 'dot' not installed; cannot render {}",
                path.display()
            );
        }
    }
}
