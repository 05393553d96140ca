//! Build runner
//!
//! Constructs a `Builder` for a request and runs it with the engine's
//! shared runtime, registry and defaults.

use async_trait::async_trait;
use keel_core::domain::{BuildRequest, BuildState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::builder::Builder;
use crate::config::Config;
use crate::error::Result;
use crate::registry::ImageRegistry;
use crate::runtime::{ContainerRuntime, OutputSink};

/// Service trait for running one build to completion
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Runs a build, streaming container output to `output`
    ///
    /// # Returns
    /// The terminal build state. A timed out build is `Ok` with exit code 124.
    async fn run(&self, request: BuildRequest, output: OutputSink) -> Result<BuildState>;
}

/// Standard implementation of BuildRunner
pub struct StandardBuildRunner {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ImageRegistry>,

    /// Time limit for requests that carry none
    default_timeout: Duration,

    cache_root: PathBuf,
    stop_grace: Duration,
}

impl StandardBuildRunner {
    /// Creates a runner using the configuration's defaults
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<ImageRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            runtime,
            registry,
            default_timeout: config.build_timeout,
            cache_root: config.cache_root.clone(),
            stop_grace: config.stop_grace,
        }
    }
}

#[async_trait]
impl BuildRunner for StandardBuildRunner {
    async fn run(&self, request: BuildRequest, output: OutputSink) -> Result<BuildState> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        debug!("Running build for {} (timeout {:?})", request.repo.name, timeout);

        let mut builder = Builder::new(self.runtime.clone(), self.registry.clone(), request)
            .with_timeout(timeout)
            .with_output(output)
            .with_cache_root(self.cache_root.clone())
            .with_stop_grace(self.stop_grace);

        builder.run().await
    }
}
