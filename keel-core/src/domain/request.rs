//! Build request types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::build::BuildScript;
use super::repo::Repo;

/// A build submitted for execution
///
/// Immutable once handed to the worker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRequest {
    pub build: BuildScript,
    pub repo: Repo,

    /// Identity file (private key) copied into the build container
    #[serde(default)]
    pub key: Vec<u8>,

    /// Time limit for this build; the pool default applies when unset
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl BuildRequest {
    pub fn new(build: BuildScript, repo: Repo) -> Self {
        Self {
            build,
            repo,
            key: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = key;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
