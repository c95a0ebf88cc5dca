//! Runner configuration.
//!
//! Defaults live in an optional `.dagrun/config.toml`, discovered by
//! walking up from the working directory. CLI flags override the file;
//! the file overrides built-in defaults. The result is a single
//! immutable `Settings` value threaded by reference through the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".dagrun";

/// Fallback when total system memory cannot be determined.
const MEM_FALLBACK: u64 = 16 * 1024 * 1024 * 1024;

fn default_max_jobs_parallel() -> usize {
    100
}

fn default_poll_interval_millis() -> u64 {
    1000
}

fn default_dry_run_poll_millis() -> u64 {
    10
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_events_log() -> PathBuf {
    PathBuf::from("dagrun-events.jsonl")
}

#[derive(Debug, Deserialize)]
pub struct RunnerDefaults {
    #[serde(default = "default_max_jobs_parallel")]
    pub max_jobs_parallel: usize,
    /// Admission memory budget in bytes; unset means total system memory.
    #[serde(default)]
    pub mem_limit: Option<u64>,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_dry_run_poll_millis")]
    pub dry_run_poll_millis: u64,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_events_log")]
    pub events_log: PathBuf,
}

impl Default for RunnerDefaults {
    fn default() -> Self {
        Self {
            max_jobs_parallel: default_max_jobs_parallel(),
            mem_limit: None,
            poll_interval_millis: default_poll_interval_millis(),
            dry_run_poll_millis: default_dry_run_poll_millis(),
            shell: default_shell(),
            events_log: default_events_log(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub defaults: RunnerDefaults,
}

impl RunnerConfig {
    /// Search upward from `start` for a `.dagrun/config.toml` and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: RunnerConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((RunnerConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

/// Resolved, immutable run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_jobs_parallel: usize,
    pub mem_limit: u64,
    pub dry_run: bool,
    pub stop_on_failure: bool,
    pub poll_interval: Duration,
    pub shell: String,
    pub events_log: PathBuf,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: &RunnerConfig) -> Self {
        let defaults = &config.defaults;
        let dry_run = cli.dry_run;
        let poll_millis = if dry_run {
            defaults.dry_run_poll_millis
        } else {
            defaults.poll_interval_millis
        };
        Self {
            max_jobs_parallel: cli.maxjobs.unwrap_or(defaults.max_jobs_parallel),
            mem_limit: cli
                .mem_limit
                .or(defaults.mem_limit)
                .unwrap_or_else(total_system_memory),
            dry_run,
            stop_on_failure: true,
            poll_interval: Duration::from_millis(poll_millis),
            shell: defaults.shell.clone(),
            events_log: defaults.events_log.clone(),
        }
    }
}

/// Total system memory in bytes, from `/proc/meminfo` where available.
pub fn total_system_memory() -> u64 {
    read_meminfo_total(Path::new("/proc/meminfo")).unwrap_or(MEM_FALLBACK)
}

fn read_meminfo_total(path: &Path) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        let Some(rest) = line.strip_prefix("MemTotal:") else {
            continue;
        };
        let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        return Some(kib * 1024);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use std::fs;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["dagrun", "-f", "wf.json"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn default_config_values() {
        let config = RunnerConfig::default();
        assert_eq!(config.defaults.max_jobs_parallel, 100);
        assert!(config.defaults.mem_limit.is_none());
        assert_eq!(config.defaults.poll_interval_millis, 1000);
        assert_eq!(config.defaults.dry_run_poll_millis, 10);
        assert_eq!(config.defaults.shell, "/bin/bash");
        assert_eq!(
            config.defaults.events_log,
            PathBuf::from("dagrun-events.jsonl")
        );
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[defaults]
max_jobs_parallel = 4
mem_limit = 2048
"#;
        let config: RunnerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.defaults.max_jobs_parallel, 4);
        assert_eq!(config.defaults.mem_limit, Some(2048));
        assert_eq!(config.defaults.poll_interval_millis, 1000);
        assert_eq!(config.defaults.shell, "/bin/bash");
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = RunnerConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.defaults.max_jobs_parallel, 100);
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".dagrun");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("config.toml"),
            r#"
[defaults]
shell = "/bin/sh"
"#,
        )
        .unwrap();

        let nested = tmp.path().join("runs").join("deep");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = RunnerConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert_eq!(config.defaults.shell, "/bin/sh");
    }

    #[test]
    fn cli_overrides_config_file() {
        let config: RunnerConfig = toml::from_str(
            r#"
[defaults]
max_jobs_parallel = 4
mem_limit = 2048
"#,
        )
        .unwrap();

        let settings = Settings::resolve(&cli(&["--maxjobs", "2", "--mem-limit", "512"]), &config);
        assert_eq!(settings.max_jobs_parallel, 2);
        assert_eq!(settings.mem_limit, 512);

        let settings = Settings::resolve(&cli(&[]), &config);
        assert_eq!(settings.max_jobs_parallel, 4);
        assert_eq!(settings.mem_limit, 2048);
    }

    #[test]
    fn dry_run_shortens_poll_interval() {
        let config = RunnerConfig::default();
        let normal = Settings::resolve(&cli(&[]), &config);
        assert_eq!(normal.poll_interval, Duration::from_millis(1000));
        assert!(!normal.dry_run);
        assert!(normal.stop_on_failure);

        let dry = Settings::resolve(&cli(&["--dry-run"]), &config);
        assert_eq!(dry.poll_interval, Duration::from_millis(10));
        assert!(dry.dry_run);
    }

    #[test]
    fn unset_mem_limit_falls_back_to_system_memory() {
        let settings = Settings::resolve(&cli(&[]), &RunnerConfig::default());
        assert!(settings.mem_limit > 0);
    }

    #[test]
    fn meminfo_parsing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meminfo");
        fs::write(
            &path,
            "MemTotal:       16384 kB\nMemFree:         1024 kB\n",
        )
        .unwrap();
        assert_eq!(read_meminfo_total(&path), Some(16384 * 1024));

        fs::write(&path, "nothing relevant\n").unwrap();
        assert_eq!(read_meminfo_total(&path), None);
    }
}
