//! Workflow file loading and validation.
//!
//! A workflow is a JSON document of shape `{ "stages": [ ... ] }` where each
//! stage names a shell command, a working directory, its prerequisite stages,
//! and a memory reservation. Loading validates referential integrity up
//! front: every `needs` entry must resolve to a declared stage, names must be
//! unique, and no stage may list itself. Cycle detection happens later, when
//! the dependency graph is built.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read workflow file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),
    #[error("stage '{stage}' needs unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },
    #[error("stage '{0}' lists itself as a prerequisite")]
    SelfDependency(String),
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),
}

/// Memory reservation for one stage, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub mem: u64,
}

/// One declared unit of shell work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Stage {
    pub name: String,
    pub cmd: String,
    /// Working directory; empty means the current directory.
    #[serde(default)]
    pub cwd: String,
    /// Names of prerequisite stages.
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
    /// Scheduling weight grouping related stages; -1 means global.
    #[serde(default = "default_timeframe")]
    pub timeframe: i64,
}

fn default_timeframe() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Workflow {
    pub stages: Vec<Stage>,
}

impl Workflow {
    /// Parse a workflow from JSON text and validate stage references.
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, WorkflowError> {
        let workflow: Workflow =
            serde_json::from_str(text).map_err(|source| WorkflowError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Load and validate a workflow file.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let text = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(WorkflowError::DuplicateStage(stage.name.clone()));
            }
        }

        for stage in &self.stages {
            for dependency in &stage.needs {
                if dependency == &stage.name {
                    return Err(WorkflowError::SelfDependency(stage.name.clone()));
                }
                if !seen.contains(dependency.as_str()) {
                    return Err(WorkflowError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
