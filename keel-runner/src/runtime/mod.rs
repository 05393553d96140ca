//! Container runtime contract
//!
//! The engine orchestrates calls into a container runtime but does not
//! implement one. `ContainerRuntime` is the contract the builder relies on;
//! `CliRuntime` satisfies it by driving a Docker-compatible command line
//! (docker or podman).
//!
//! Implementations must be safe to call concurrently from many builders.

mod cli;
#[cfg(test)]
pub(crate) mod mock;

pub use cli::CliRuntime;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Byte stream destination for live container output
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors reported by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The image or container does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime rejected the command
    #[error("`{command}` failed (exit code {code}): {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The runtime could not be invoked at all
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime answered with something we could not interpret
    #[error("unexpected runtime output: {0}")]
    Parse(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Image details returned by inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
}

/// Container details returned by inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,

    /// Container name without the leading slash some runtimes report
    pub name: String,

    /// Private network address
    pub ip_address: String,

    /// Exposed container ports, without protocol suffix
    pub ports: Vec<String>,
}

/// Runtime options for the main build container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub privileged: bool,

    /// Links in `<container name>:<alias>` form
    pub links: Vec<String>,

    /// Bind mounts in `<host path>:<container path>` form
    pub binds: Vec<String>,
}

/// Configuration of the main build container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    pub image: String,
    pub host: HostConfig,
}

/// Operations the engine needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspects an image, returning `RuntimeError::NotFound` if absent
    async fn inspect_image(&self, name: &str) -> Result<ImageInfo, RuntimeError>;

    async fn pull_image(&self, name: &str) -> Result<(), RuntimeError>;

    /// Builds an image tagged `tag` from the context directory
    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<(), RuntimeError>;

    async fn remove_image(&self, id: &str) -> Result<(), RuntimeError>;

    /// Runs a detached container with the given ports published
    ///
    /// # Returns
    /// Container ID
    async fn run_daemon(&self, image: &str, ports: &[String]) -> Result<String, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Creates (but does not start) a container
    ///
    /// # Returns
    /// Container ID
    async fn create_container(&self, config: &ContainerConfig) -> Result<String, RuntimeError>;

    /// Attaches the container's stdout and stderr to `sink`
    ///
    /// Returns once the attachment is in place; output then streams in the
    /// background. Must be called before `start_container` so no output
    /// is lost.
    async fn attach(&self, id: &str, sink: OutputSink) -> Result<(), RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Blocks until the container exits
    ///
    /// # Returns
    /// The container's exit code
    async fn wait_container(&self, id: &str) -> Result<i32, RuntimeError>;

    /// Stops a container, killing it after `grace`
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
}
