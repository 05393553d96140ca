//! Configuration module
//!
//! Layers command line flags over the engine configuration read from the
//! environment.

use anyhow::{Context, Result};
use keel_runner::{CliRuntime, ImageRegistry};
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: keel_runner::Config,
}

impl Config {
    /// Loads the engine configuration and applies flag overrides
    pub fn load(runtime: String, registry: Option<PathBuf>) -> Result<Self> {
        let mut engine = keel_runner::Config::from_env()?;
        engine.runtime_binary = runtime;
        if registry.is_some() {
            engine.registry_file = registry;
        }
        engine.validate().context("Invalid configuration")?;
        Ok(Self { engine })
    }

    /// Built-in registry, or the configured file layered over it
    pub fn registry(&self) -> Result<ImageRegistry> {
        match &self.engine.registry_file {
            Some(path) => ImageRegistry::from_file(path)
                .with_context(|| format!("Failed to load registry {}", path.display())),
            None => Ok(ImageRegistry::default()),
        }
    }

    pub fn runtime(&self) -> CliRuntime {
        CliRuntime::new(self.engine.runtime_binary.clone())
    }
}
