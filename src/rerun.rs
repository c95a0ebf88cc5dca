//! Rerun support: done-marker invalidation.
//!
//! The per-task wrapper leaves a `{cwd}/{name}.log_done` sentinel after a
//! successful run and skips tasks whose sentinel is present. Rerunning
//! from a task therefore means deleting the sentinel for that task and
//! everything downstream of it; untouched tasks keep their markers and
//! are skipped by the wrapper on the next run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::graph::{TaskGraph, TaskId};
use crate::workflow::{Stage, Workflow};

/// Path of a stage's done-marker. An empty `cwd` means the current
/// directory.
pub fn done_marker_path(stage: &Stage) -> PathBuf {
    let dir = if stage.cwd.is_empty() {
        Path::new(".")
    } else {
        Path::new(&stage.cwd)
    };
    dir.join(format!("{}.log_done", stage.name))
}

/// Remove done-markers for `target` and its transitive dependents.
///
/// Fails without touching anything when the target is unknown. In dry-run
/// mode only prints what would be invalidated. Returns the affected task
/// ids in id order.
pub fn invalidate_done_markers(
    workflow: &Workflow,
    graph: &TaskGraph,
    target: &str,
    dry_run: bool,
) -> Result<Vec<TaskId>> {
    let Some(target_id) = graph.lookup(target) else {
        bail!("task '{target}' not found; refusing to touch any done-markers");
    };

    let closure = graph.downstream_closure(target_id);
    for id in &closure {
        let stage = &workflow.stages[*id];
        if dry_run {
            println!("would mark task '{}' to be done again", stage.name);
            continue;
        }

        println!("marking task '{}' to be done again", stage.name);
        let marker = done_marker_path(stage);
        if marker.is_file() {
            std::fs::remove_file(&marker)
                .with_context(|| format!("failed to remove done-marker {}", marker.display()))?;
            debug!(marker = %marker.display(), "removed done-marker");
        }
    }

    Ok(closure.into_iter().collect())
}
