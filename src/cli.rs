use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "dagrun",
    about = "Parallel execution of a DAG command pipeline under resource constraints",
    version
)]
pub struct Cli {
    /// Input workflow file (JSON)
    #[arg(short = 'f', long)]
    pub workflowfile: PathBuf,

    /// Maximum number of parallel tasks (default 100)
    #[arg(short = 'j', long = "maxjobs", alias = "jmax")]
    pub maxjobs: Option<usize>,

    /// Show what would be done; tasks are replaced by echo stubs
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Save a Graphviz visualization of the workflow
    #[arg(long, default_value_t = false)]
    pub visualize_workflow: bool,

    /// Run the pipeline by target labels (reserved, not implemented)
    #[arg(long)]
    pub target_stages: Option<String>,

    /// Produce a shell script that runs the workflow serially, then quit
    #[arg(long)]
    pub produce_script: Option<PathBuf>,

    /// Rerun the workflow starting from the given task; all dependent
    /// tasks will be rerun as well
    #[arg(long)]
    pub rerun_from: Option<String>,

    /// List all task names and quit
    #[arg(long, default_value_t = false)]
    pub list_tasks: bool,

    /// Memory limit in bytes used as a scheduling constraint
    /// (default: total system memory)
    #[arg(long)]
    pub mem_limit: Option<u64>,
}
