//! Error types for the Keel engine

use thiserror::Error;

use crate::registry::RegistryError;
use crate::runtime::RuntimeError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that can end a build before it produces an exit code
///
/// A timeout is not an error: it is reported through the build state.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build definition names no image
    #[error("missing build image")]
    MissingImage,

    /// The builder was already run once
    #[error("build has already been run")]
    AlreadyRun,

    /// A service declaration could not be resolved
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Filesystem error while preparing the build context or cache volumes
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The build container's execution task died before reporting
    #[error("build execution aborted: {0}")]
    Execution(String),

    /// A call into the container runtime failed
    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl BuildError {
    /// Create an I/O error with a description of what was being attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error came from the container runtime
    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Runtime(_))
    }
}

/// Errors from the worker pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts tasks
    #[error("worker pool is shut down")]
    Closed,
}
