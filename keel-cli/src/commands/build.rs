//! Build command handler
//!
//! Runs one build of a local repository through a single-worker pool and
//! streams the container's output to stdout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::*;
use keel_core::domain::{BuildReport, BuildRequest, BuildStatus, Repo};
use keel_runner::artifacts;
use keel_runner::{BuildReporter, BuildTask, StandardBuildRunner, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;
use uuid::Uuid;

use super::load_build;
use crate::config::Config;

pub struct BuildOptions {
    pub path: PathBuf,
    pub file: Option<PathBuf>,
    pub name: Option<String>,
    pub identity: Option<PathBuf>,
    pub branch: String,
    pub commit: String,
    pub timeout: Option<u64>,
}

/// Hands the final report back to the command
struct ReportChannel {
    sender: Mutex<Option<oneshot::Sender<BuildReport>>>,
}

#[async_trait]
impl BuildReporter for ReportChannel {
    async fn started(&self, id: Uuid) {
        info!("Build {} started", id);
    }

    async fn finished(&self, report: BuildReport) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(report);
        }
    }
}

/// Runs a build and prints its summary
///
/// # Returns
/// The build's exit code
pub async fn run_build(options: BuildOptions, config: &Config) -> Result<i32> {
    let path = options
        .path
        .canonicalize()
        .with_context(|| format!("Repository {} not found", options.path.display()))?;

    let build = load_build(&path, options.file.as_deref())?;
    let repo = local_repo(&path, options.name, options.branch, options.commit);

    let mut request = BuildRequest::new(build, repo);
    if let Some(identity) = &options.identity {
        let key = std::fs::read(identity)
            .with_context(|| format!("Failed to read identity {}", identity.display()))?;
        request = request.with_key(key);
    }
    if let Some(secs) = options.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let runtime = config.runtime();
    let version = runtime
        .check_available()
        .await
        .with_context(|| format!("Container runtime {} is not available", runtime.binary()))?;
    info!("Using {}", version);

    let registry = config.registry()?;
    let runner = StandardBuildRunner::new(Arc::new(runtime), Arc::new(registry), &config.engine);

    let (sender, receiver) = oneshot::channel();
    let reporter = Arc::new(ReportChannel {
        sender: Mutex::new(Some(sender)),
    });

    println!(
        "{} {} ({})",
        "Building".bold(),
        request.repo.name.cyan(),
        request.build.image
    );

    let mut pool = WorkerPool::start(1, Arc::new(runner));
    pool.enqueue(BuildTask::new(
        request,
        Box::new(tokio::io::stdout()),
        reporter,
    ))?;
    pool.shutdown().await;

    let report = receiver.await.context("Build finished without a report")?;
    print_summary(&report);

    Ok(match report.status {
        BuildStatus::Success => 0,
        _ => report.state.exit_code,
    })
}

/// Describes a repository directory on this machine
fn local_repo(path: &Path, name: Option<String>, branch: String, commit: String) -> Repo {
    let name = name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "build".to_string())
    });
    let dir = format!("{}/src/{}", artifacts::CACHE_DIR, name);

    Repo {
        name,
        path: path.to_string_lossy().to_string(),
        branch,
        commit,
        dir,
        ..Default::default()
    }
}

fn print_summary(report: &BuildReport) {
    let status = match report.status {
        BuildStatus::Success => "SUCCESS".green().bold(),
        BuildStatus::Error => "ERROR".red().bold(),
        _ if report.state.timed_out() => "TIMED OUT".yellow().bold(),
        _ => "FAILURE".red().bold(),
    };

    println!();
    println!("{} {}", "Build:".bold(), report.id);
    println!("{} {}", "Status:".bold(), status);
    println!("{} {}", "Exit code:".bold(), report.state.exit_code);
    println!("{} {}s", "Duration:".bold(), report.state.duration());
    if let Some(error) = &report.error {
        println!("{} {}", "Error:".bold(), error.red());
    }
}
