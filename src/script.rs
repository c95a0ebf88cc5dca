//! Standalone-script emission.
//!
//! Serializes the workflow into a bash script that runs every task once,
//! in a topological order, without the scheduler. The task wrapper still
//! honors existing done-markers because the script exports
//! `JOBUTILS_SKIPDONE=ON` before the first task.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::graph::TaskGraph;
use crate::workflow::{Stage, Workflow};

/// Render the serial runner script.
pub fn render_script(workflow: &Workflow, graph: &TaskGraph) -> Result<String> {
    let order = graph.topological_sort()?;

    let mut lines = vec![
        "#!/usr/bin/env bash".to_string(),
        "# THIS FILE IS AUTOGENERATED".to_string(),
        "JOBUTILS_SKIPDONE=ON".to_string(),
    ];
    for id in order {
        emit_task(&workflow.stages[id], &mut lines);
    }

    Ok(lines.join("\n") + "\n")
}

/// Write the script to `path` and log the emission.
pub fn produce_script(workflow: &Workflow, graph: &TaskGraph, path: &Path) -> Result<()> {
    let script = render_script(workflow, graph)?;
    std::fs::write(path, script)
        .with_context(|| format!("failed to write script {}", path.display()))?;
    info!(script = %path.display(), tasks = workflow.stages.len(), "serial script produced");
    Ok(())
}

fn emit_task(stage: &Stage, lines: &mut Vec<String>) {
    if stage.cwd.is_empty() {
        lines.push(stage.cmd.clone());
        return;
    }
    lines.push(format!("[ ! -d {} ] && mkdir {}", stage.cwd, stage.cwd));
    lines.push(format!("cd {}", stage.cwd));
    lines.push(stage.cmd.clone());
    lines.push("cd \"$OLDPWD\"".to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Resources;

    fn mk_workflow(stages: &[(&str, &[&str], &str)]) -> (Workflow, TaskGraph) {
        let workflow = Workflow {
            stages: stages
                .iter()
                .map(|(name, needs, cwd)| Stage {
                    name: name.to_string(),
                    cmd: format!("run-{name}"),
                    cwd: cwd.to_string(),
                    needs: needs.iter().map(|n| n.to_string()).collect(),
                    resources: Resources::default(),
                    timeframe: -1,
                })
                .collect(),
        };
        let graph = TaskGraph::from_workflow(&workflow).unwrap();
        (workflow, graph)
    }

    #[test]
    fn script_starts_with_header() {
        let (workflow, graph) = mk_workflow(&[("a", &[], "wd")]);
        let script = render_script(&workflow, &graph).unwrap();
        let lines: Vec<_> = script.lines().collect();
        assert_eq!(lines[0], "#!/usr/bin/env bash");
        assert_eq!(lines[1], "# THIS FILE IS AUTOGENERATED");
        assert_eq!(lines[2], "JOBUTILS_SKIPDONE=ON");
    }

    #[test]
    fn commands_follow_dependency_order() {
        let (workflow, graph) = mk_workflow(&[
            ("a", &[], "wd-a"),
            ("b", &[], "wd-b"),
            ("c", &["a", "b"], "wd-c"),
        ]);
        let script = render_script(&workflow, &graph).unwrap();

        let pos = |needle: &str| script.find(needle).unwrap();
        assert!(pos("run-a") < pos("run-c"));
        assert!(pos("run-b") < pos("run-c"));
    }

    #[test]
    fn task_block_enters_and_leaves_workdir() {
        let (workflow, graph) = mk_workflow(&[("a", &[], "wd-a")]);
        let script = render_script(&workflow, &graph).unwrap();
        let lines: Vec<_> = script.lines().collect();
        assert_eq!(lines[3], "[ ! -d wd-a ] && mkdir wd-a");
        assert_eq!(lines[4], "cd wd-a");
        assert_eq!(lines[5], "run-a");
        assert_eq!(lines[6], "cd \"$OLDPWD\"");
    }

    #[test]
    fn empty_workdir_emits_bare_command() {
        let (workflow, graph) = mk_workflow(&[("a", &[], "")]);
        let script = render_script(&workflow, &graph).unwrap();
        let lines: Vec<_> = script.lines().collect();
        assert_eq!(lines[3], "run-a");
        assert!(!script.contains("mkdir"));
        assert!(!script.contains("cd "));
    }

    #[test]
    fn produce_script_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.sh");
        let (workflow, graph) = mk_workflow(&[("a", &[], ""), ("b", &["a"], "")]);

        produce_script(&workflow, &graph, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("#!/usr/bin/env bash"));
        assert!(written.find("run-a").unwrap() < written.find("run-b").unwrap());
    }
}
