//! Keel Runner
//!
//! The build execution engine.
//!
//! Architecture:
//! - Registry: builder aliases and service images
//! - Artifacts: generated build context files (image definition, build script, proxy script)
//! - Runtime: the container runtime contract and a CLI-backed implementation
//! - Builder: one build's setup, run and teardown
//! - Service: turns build requests into builders
//! - Scheduler: the worker pool that runs builds concurrently
//!
//! A submitter enqueues a task, an idle worker picks it up and runs a
//! `Builder` for it, and the final `BuildReport` goes to the task's reporter.

pub mod artifacts;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod service;

pub use builder::Builder;
pub use config::Config;
pub use error::{BuildError, Result};
pub use registry::ImageRegistry;
pub use runtime::{CliRuntime, ContainerRuntime, OutputSink};
pub use scheduler::{BuildTask, WorkerPool};
pub use service::{BuildReporter, BuildRunner, LogReporter, StandardBuildRunner};
