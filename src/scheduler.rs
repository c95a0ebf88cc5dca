//! Resource-constrained DAG executor.
//!
//! One scheduler thread of control supervises N parallel child processes.
//! The executor is responsible for:
//! - maintaining the candidate list of tasks whose prerequisites are done,
//! - admitting candidates under the memory budget and the parallelism cap,
//! - polling running processes and reaping completions,
//! - propagating the first failure by killing every surviving child,
//! - detecting drain and hopeless (never-admissible) configurations.
//!
//! All scheduler state is owned by the executor; children run concurrently
//! but only the scheduler mutates the status map, the memory counter, and
//! the candidate list.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::graph::{TaskGraph, TaskId};
use crate::log::{ExecutionLog, LogEvent};
use crate::process::{ProcessHandle, Spawner};
use crate::workflow::Workflow;

/// Per-task scheduling state.
///
/// `Failed` is terminal for the whole run: under stop-on-failure the first
/// failed task aborts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    ToDo,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub tasks_done: usize,
    pub scheduling_iterations: u64,
}

struct RunningTask<H> {
    id: TaskId,
    handle: H,
}

pub struct Executor<'a, S: Spawner> {
    workflow: &'a Workflow,
    graph: &'a TaskGraph,
    settings: &'a Settings,
    spawner: S,
    events: Option<&'a ExecutionLog>,
    interrupted: Arc<AtomicBool>,
    status: Vec<Status>,
    mem_per_task: Vec<u64>,
    weights: Vec<i64>,
    candidates: Vec<TaskId>,
    running: Vec<RunningTask<S::Handle>>,
    finished: HashSet<TaskId>,
    mem_booked: u64,
    scheduling_iteration: u64,
}

impl<'a, S: Spawner> Executor<'a, S> {
    pub fn new(
        workflow: &'a Workflow,
        graph: &'a TaskGraph,
        settings: &'a Settings,
        spawner: S,
        events: Option<&'a ExecutionLog>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        let mem_per_task = workflow.stages.iter().map(|s| s.resources.mem).collect();
        let weights = workflow.stages.iter().map(|s| s.timeframe).collect();
        Self {
            workflow,
            graph,
            settings,
            spawner,
            events,
            interrupted,
            status: vec![Status::ToDo; workflow.stages.len()],
            mem_per_task,
            weights,
            candidates: Vec::new(),
            running: Vec::new(),
            finished: HashSet::new(),
            mem_booked: 0,
            scheduling_iteration: 0,
        }
    }

    pub fn status(&self, id: TaskId) -> Status {
        self.status[id]
    }

    /// Drive the workflow to completion.
    ///
    /// Returns an error when a task fails (stop-on-failure), a spawn is
    /// refused, the run is interrupted, or the remaining candidates can
    /// never be admitted.
    pub fn run(&mut self) -> Result<ExecutionSummary> {
        self.candidates = self.graph.roots().to_vec();
        info!(
            tasks = self.graph.len(),
            mem_limit = self.settings.mem_limit,
            max_jobs_parallel = self.settings.max_jobs_parallel,
            dry_run = self.settings.dry_run,
            "starting workflow execution"
        );

        loop {
            self.sort_candidates();
            let admitted = self.admit_candidates()?;

            if self.running.is_empty() {
                if self.candidates.is_empty() {
                    break;
                }
                if admitted == 0 {
                    let first = self.graph.name(self.candidates[0]);
                    self.log_abort("no admissible candidates", 0);
                    bail!(
                        "cannot make progress: {} candidate task(s) can never be admitted \
                         under mem limit {} with {} parallel jobs (first blocked: '{first}')",
                        self.candidates.len(),
                        self.settings.mem_limit,
                        self.settings.max_jobs_parallel,
                    );
                }
            }

            let newly_finished = self.wait_for_completions()?;
            self.extend_candidates(&newly_finished);

            if self.candidates.is_empty() && self.running.is_empty() {
                break;
            }
        }

        let summary = ExecutionSummary {
            tasks_done: self.finished.len(),
            scheduling_iterations: self.scheduling_iteration,
        };
        info!(tasks_done = summary.tasks_done, "workflow drained");
        if let Some(events) = self.events {
            events.log(LogEvent::RunCompleted {
                tasks_done: summary.tasks_done,
            })?;
        }
        Ok(summary)
    }

    /// Stable sort by timeframe weight; ties keep their prior order.
    fn sort_candidates(&mut self) {
        self.candidates.sort_by_key(|id| self.weights[*id]);
    }

    /// Admit candidates in weight order until one does not fit.
    ///
    /// The scan stops at the first candidate the budget cannot take right
    /// now; skipping ahead would starve high-memory tasks behind a stream
    /// of small ones.
    fn admit_candidates(&mut self) -> Result<usize> {
        self.scheduling_iteration += 1;
        let scan: Vec<TaskId> = self.candidates.clone();
        let mut admitted = 0;

        for id in scan {
            let mem = self.mem_per_task[id];
            if self.mem_booked + mem > self.settings.mem_limit
                || self.running.len() >= self.settings.max_jobs_parallel
            {
                debug!(
                    task = self.graph.name(id),
                    mem,
                    mem_booked = self.mem_booked,
                    "admission stops at tight candidate"
                );
                break;
            }

            let stage = &self.workflow.stages[id];
            let handle =
                match self
                    .spawner
                    .spawn(stage, self.scheduling_iteration, self.settings.dry_run)
                {
                    Ok(handle) => handle,
                    Err(err) => {
                        self.status[id] = Status::Failed;
                        let reason = format!("failed to spawn task '{}'", stage.name);
                        let killed = self.kill_running();
                        self.log_abort(&reason, killed);
                        return Err(err.context(format!("{reason}; aborting pipeline")));
                    }
                };

            self.status[id] = Status::Running;
            self.mem_booked += mem;
            self.running.push(RunningTask { id, handle });
            self.candidates.retain(|c| *c != id);
            admitted += 1;

            debug!(
                task = self.graph.name(id),
                mem,
                mem_booked = self.mem_booked,
                running = self.running.len(),
                "task admitted"
            );
            if let Some(events) = self.events {
                events.log(LogEvent::TaskStarted {
                    task: self.graph.name(id).to_string(),
                    mem_booked: self.mem_booked,
                    iteration: self.scheduling_iteration,
                })?;
            }
        }

        Ok(admitted)
    }

    /// Poll running tasks until at least one finishes (or nothing is left).
    ///
    /// Sleeps `settings.poll_interval` between passes. A nonzero exit under
    /// stop-on-failure kills every surviving child and aborts; dry runs
    /// treat every exit as success.
    fn wait_for_completions(&mut self) -> Result<Vec<TaskId>> {
        let mut newly_finished = Vec::new();

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                let killed = self.kill_running();
                self.log_abort("interrupted", killed);
                bail!("interrupted; killed {killed} running task(s)");
            }

            let mut reaped = Vec::new();
            let mut poll_error = None;
            self.running.retain_mut(|task| {
                if poll_error.is_some() {
                    return true;
                }
                match task.handle.try_wait() {
                    Ok(Some(exit)) => {
                        reaped.push((task.id, exit));
                        false
                    }
                    Ok(None) => true,
                    Err(err) => {
                        poll_error = Some(err);
                        true
                    }
                }
            });
            if let Some(err) = poll_error {
                let killed = self.kill_running();
                self.log_abort("poll failure", killed);
                return Err(err.context("failed to poll running tasks; aborting pipeline"));
            }

            let mut failure_detected = false;
            for (id, exit) in reaped {
                self.mem_booked -= self.mem_per_task[id];
                let success = self.settings.dry_run || exit.success();
                if let Some(events) = self.events {
                    events.log(LogEvent::TaskFinished {
                        task: self.graph.name(id).to_string(),
                        exit_code: exit.code,
                        success,
                    })?;
                }
                if success {
                    self.status[id] = Status::Done;
                    self.finished.insert(id);
                    newly_finished.push(id);
                    info!(task = self.graph.name(id), code = ?exit.code, "task finished");
                } else {
                    self.status[id] = Status::Failed;
                    failure_detected = true;
                    warn!(task = self.graph.name(id), code = ?exit.code, "task failed");
                }
            }

            if failure_detected && self.settings.stop_on_failure {
                let killed = self.kill_running();
                self.log_abort("stage failure", killed);
                bail!("stopping pipeline due to a failed stage; killed {killed} running task(s)");
            }

            if !newly_finished.is_empty() || self.running.is_empty() {
                return Ok(newly_finished);
            }
            std::thread::sleep(self.settings.poll_interval);
        }
    }

    /// Re-evaluate the successors of freshly finished tasks and append the
    /// ones whose full prerequisite closure is now done.
    fn extend_candidates(&mut self, newly_finished: &[TaskId]) {
        for id in newly_finished {
            for succ in self.graph.successors(*id) {
                if self.is_candidate(*succ) && !self.candidates.contains(succ) {
                    self.candidates.push(*succ);
                }
            }
        }
        debug!(candidates = ?self.candidates, "candidate list updated");
    }

    fn is_candidate(&self, id: TaskId) -> bool {
        self.status[id] == Status::ToDo
            && self
                .graph
                .all_needs(id)
                .iter()
                .all(|need| self.finished.contains(need))
    }

    /// Kill every running child without waiting for reaping.
    fn kill_running(&mut self) -> usize {
        let mut killed = 0;
        for task in &mut self.running {
            match task.handle.kill() {
                Ok(()) => killed += 1,
                Err(err) => {
                    warn!(task = self.graph.name(task.id), "failed to kill task: {err:#}");
                }
            }
        }
        self.running.clear();
        killed
    }

    fn log_abort(&self, reason: &str, killed: usize) {
        if let Some(events) = self.events {
            let _ = events.log(LogEvent::PipelineAborted {
                reason: reason.to_string(),
                killed,
            });
        }
    }
}
