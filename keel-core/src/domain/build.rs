//! Build domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exit code recorded when a build exceeds its time limit
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code recorded when the build container could not be started or awaited
pub const EXIT_FAILURE: i32 = 1;

/// Destination for the commands and environment of a build script
///
/// Implemented by the build script generator; `BuildScript` writes its
/// stages through this trait so the domain stays free of shell details.
pub trait CommandWriter {
    /// Writes an environment assignment
    fn write_env(&mut self, key: &str, value: &str);

    /// Writes a command to execute
    fn write_cmd(&mut self, command: &str);
}

/// Build definition
///
/// Describes the image a build runs in, the commands of each stage and the
/// supporting services and cache volumes it needs. Usually read from a
/// `.keel.json` file at the root of the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildScript {
    /// Human readable build name, used in logs
    pub name: String,

    /// Base image (or builder alias) the build runs in
    pub image: String,

    /// Environment variables in `KEY=VALUE` form
    pub env: Vec<String>,

    /// Build stage commands
    pub script: Vec<String>,

    /// Deploy stage commands
    pub deploy: Vec<String>,

    /// Publish stage commands
    pub publish: Vec<String>,

    /// Extra `/etc/hosts` lines (e.g. "10.0.0.5 db.internal")
    pub hosts: Vec<String>,

    /// Paths persisted across builds of the same repository and branch
    pub cache: Vec<String>,

    /// Service declarations, see the service image registry
    pub services: Vec<String>,
}

impl BuildScript {
    /// Parses a build definition from JSON
    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }

    /// Writes every stage: build, deploy and publish
    pub fn write(&self, f: &mut impl CommandWriter) {
        self.write_build(f);
        for command in self.deploy.iter().chain(&self.publish) {
            f.write_cmd(command);
        }
    }

    /// Writes the environment and the build stage only
    pub fn write_build(&self, f: &mut impl CommandWriter) {
        for entry in &self.env {
            match entry.split_once('=') {
                Some((key, value)) => f.write_env(key, value),
                None => f.write_env(entry, ""),
            }
        }
        for command in &self.script {
            f.write_cmd(command);
        }
    }
}

/// Terminal record of a build
///
/// Timestamps are unix seconds. `finished` is never earlier than `started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub started: i64,
    pub finished: i64,
    pub exit_code: i32,
}

impl BuildState {
    /// Creates a state stamped with the current time and a zero exit code
    pub fn started_now() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            started: now,
            finished: now,
            exit_code: 0,
        }
    }

    /// Stamps the finish time and records the exit code
    pub fn finish(&mut self, exit_code: i32) {
        self.finished = chrono::Utc::now().timestamp().max(self.started);
        self.exit_code = exit_code;
    }

    /// True when the build was stopped by its time limit
    pub fn timed_out(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT
    }

    /// Duration of the build in seconds
    pub fn duration(&self) -> i64 {
        self.finished - self.started
    }
}

/// Build status as reported to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Pending,
    Started,
    Success,
    Failure,
    Error,
}

impl BuildStatus {
    /// Status of a build that produced a state (no engine error)
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            BuildStatus::Success
        } else {
            BuildStatus::Failure
        }
    }
}

/// Completion record handed to the submitter's sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub id: Uuid,
    pub status: BuildStatus,
    pub state: BuildState,
    pub error: Option<String>,
}
