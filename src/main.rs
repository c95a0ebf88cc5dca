mod cli;
mod config;
mod graph;
mod log;
mod process;
mod rerun;
mod scheduler;
mod script;
mod viz;
mod workflow;

use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::{RunnerConfig, Settings};
use graph::TaskGraph;
use log::{ExecutionLog, LogEvent};
use process::ShellSpawner;
use scheduler::Executor;
use workflow::Workflow;

const LOG_FILE: &str = "example.log";

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging().context("failed to initialize logging")?;

    let cwd = std::env::current_dir()?;
    let (runner_config, config_path) = RunnerConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .dagrun/config.toml found, using defaults"),
    }
    let settings = Settings::resolve(&cli, &runner_config);

    let workflow = Workflow::load(&cli.workflowfile)
        .with_context(|| format!("failed to load workflow {}", cli.workflowfile.display()))?;
    let graph = TaskGraph::from_workflow(&workflow)
        .context("workflow dependency graph is invalid")?;

    if cli.visualize_workflow {
        viz::write_workflow_dot(&workflow, std::path::Path::new("workflow.gv"))?;
    }

    if cli.list_tasks {
        for stage in &workflow.stages {
            println!("{}", stage.name);
        }
        return Ok(());
    }

    if let Some(ref path) = cli.produce_script {
        script::produce_script(&workflow, &graph, path)?;
        return Ok(());
    }

    if let Some(ref label) = cli.target_stages {
        warn!(label = %label, "--target-stages is not implemented; ignoring");
    }

    let events = ExecutionLog::new(&settings.events_log)?;

    if let Some(ref target) = cli.rerun_from {
        let affected =
            rerun::invalidate_done_markers(&workflow, &graph, target, settings.dry_run)?;
        events.log(LogEvent::MarkersInvalidated {
            rerun_from: target.clone(),
            tasks: affected
                .iter()
                .map(|id| graph.name(*id).to_string())
                .collect(),
        })?;
    }

    events.log(LogEvent::RunStarted {
        workflow_file: cli.workflowfile.display().to_string(),
        task_count: workflow.stages.len(),
        mem_limit: settings.mem_limit,
        max_jobs_parallel: settings.max_jobs_parallel,
        dry_run: settings.dry_run,
    })?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install interrupt handler")?;

    let spawner = ShellSpawner::new(settings.shell.clone());
    let mut executor = Executor::new(
        &workflow,
        &graph,
        &settings,
        spawner,
        Some(&events),
        interrupted,
    );
    let summary = executor.run()?;
    info!(
        tasks_done = summary.tasks_done,
        iterations = summary.scheduling_iterations,
        "workflow execution finished"
    );
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dagrun=debug"));
    let log_file =
        File::create(LOG_FILE).with_context(|| format!("failed to create {LOG_FILE}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .with_target(false)
        .init();
    Ok(())
}
