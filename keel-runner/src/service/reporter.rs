//! Build reporting
//!
//! A reporter is the caller-supplied sink for build lifecycle events. The
//! persistence layer and notification plumbing live behind it.

use async_trait::async_trait;
use keel_core::domain::{BuildReport, BuildStatus};
use tracing::{info, warn};
use uuid::Uuid;

/// Receives lifecycle events for builds run by the worker pool
#[async_trait]
pub trait BuildReporter: Send + Sync {
    /// Called when a worker picks the build up, before setup begins
    async fn started(&self, id: Uuid);

    /// Called once the build has been torn down
    async fn finished(&self, report: BuildReport);
}

/// Reporter that only logs
#[derive(Debug, Clone, Default)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildReporter for LogReporter {
    async fn started(&self, id: Uuid) {
        info!("Build {} started", id);
    }

    async fn finished(&self, report: BuildReport) {
        match report.status {
            BuildStatus::Success => info!(
                "Build {} succeeded in {}s",
                report.id,
                report.state.duration()
            ),
            BuildStatus::Error => warn!(
                "Build {} errored: {}",
                report.id,
                report.error.as_deref().unwrap_or("unknown error")
            ),
            status => info!(
                "Build {} finished with status {:?} (exit code {})",
                report.id, status, report.state.exit_code
            ),
        }
    }
}
