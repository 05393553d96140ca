//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod images;
mod vet;

use anyhow::{Context, Result};
use clap::Subcommand;
use keel_core::domain::BuildScript;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Name of the build definition at the root of a repository
pub const BUILD_FILE: &str = ".keel.json";

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a build of a local repository
    Build {
        /// Repository directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Build definition, defaults to .keel.json in the repository
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Repository name, defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,

        /// Private key installed as the build's SSH identity
        #[arg(short, long)]
        identity: Option<PathBuf>,

        #[arg(long, default_value = "master")]
        branch: String,

        #[arg(long, default_value = "")]
        commit: String,

        /// Time limit in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Check a build definition against the image registry
    Vet {
        /// Repository directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Build definition, defaults to .keel.json in the repository
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// List builder aliases and registry services
    Images,
}

/// Handle a CLI command
///
/// # Returns
/// The process exit code
pub async fn handle_command(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Build {
            path,
            file,
            name,
            identity,
            branch,
            commit,
            timeout,
        } => {
            let options = build::BuildOptions {
                path,
                file,
                name,
                identity,
                branch,
                commit,
                timeout,
            };
            build::run_build(options, config).await
        }
        Commands::Vet { path, file } => vet::vet(&path, file.as_deref(), config),
        Commands::Images => images::list_images(config),
    }
}

/// Reads the build definition for a repository directory
pub fn load_build(path: &Path, file: Option<&Path>) -> Result<BuildScript> {
    let file = file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.join(BUILD_FILE));

    let source = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read build file {}", file.display()))?;

    BuildScript::from_json(&source)
        .with_context(|| format!("Failed to parse build file {}", file.display()))
}
