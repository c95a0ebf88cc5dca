//! Structured execution log — JSON lines per run.
//!
//! Every run appends self-contained JSON objects to a `.jsonl` file:
//! run start, task starts and exits, done-marker invalidation, aborts,
//! and drain. Each line carries an RFC 3339 timestamp, making the log
//! easy to grep, stream, and post-process.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

/// A structured event in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// The event type and its data.
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the execution log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The scheduler accepted a workflow and started the main loop.
    RunStarted {
        workflow_file: String,
        task_count: usize,
        mem_limit: u64,
        max_jobs_parallel: usize,
        dry_run: bool,
    },
    /// A task was admitted and its process spawned.
    TaskStarted {
        task: String,
        mem_booked: u64,
        iteration: u64,
    },
    /// A task process was reaped.
    TaskFinished {
        task: String,
        exit_code: Option<i32>,
        success: bool,
    },
    /// Done-markers were invalidated for a rerun.
    MarkersInvalidated {
        rerun_from: String,
        tasks: Vec<String>,
    },
    /// The run was aborted and the remaining children killed.
    PipelineAborted { reason: String, killed: usize },
    /// The graph drained with every task done.
    RunCompleted { tasks_done: usize },
}

/// Append-only JSONL writer for run events.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create execution log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a JSON line and flush it.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        let line = serde_json::to_string(&entry).context("failed to serialize log entry")?;
        debug!(log = %self.path.display(), "event: {line}");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("execution log mutex poisoned"))?;
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .with_context(|| format!("failed to write execution log {}", self.path.display()))?;
        Ok(())
    }
}
