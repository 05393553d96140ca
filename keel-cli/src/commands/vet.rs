//! Vet command handler
//!
//! Checks that a build definition's image and services resolve against the
//! registry, without touching a container runtime.

use anyhow::Result;
use colored::*;
use keel_core::domain::BuildScript;
use keel_runner::ImageRegistry;
use std::path::Path;

use super::load_build;
use crate::config::Config;

/// Checks a build definition
///
/// # Returns
/// 0 when the definition is usable, 1 otherwise
pub fn vet(path: &Path, file: Option<&Path>, config: &Config) -> Result<i32> {
    let build = load_build(path, file)?;
    let registry = config.registry()?;

    let problems = check(&build, &registry);

    let image = registry.resolve_builder(&build.image);
    if !build.image.is_empty() {
        println!("{} {}", "Image:".bold(), image);
    }
    for declaration in &build.services {
        if let Ok(service) = registry.resolve_service(declaration) {
            println!("{} {} ({})", "Service:".bold(), service.name, service.tag);
        }
    }

    if problems.is_empty() {
        println!("{}", "Build definition OK".green());
        return Ok(0);
    }

    for problem in &problems {
        println!("{} {}", "✗".red(), problem);
    }
    Ok(1)
}

/// Lists everything that would stop the build from starting
fn check(build: &BuildScript, registry: &ImageRegistry) -> Vec<String> {
    let mut problems = Vec::new();

    if build.image.is_empty() {
        problems.push("no build image specified".to_string());
    }

    if build.script.is_empty() {
        problems.push("no build commands".to_string());
    }

    for declaration in &build.services {
        if let Err(e) = registry.resolve_service(declaration) {
            problems.push(e.to_string());
        }
    }

    for entry in &build.env {
        if !entry.contains('=') {
            problems.push(format!("environment entry {:?} has no value", entry));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_definition() {
        let build = BuildScript {
            image: "go1.22".to_string(),
            script: vec!["go test ./...".to_string()],
            services: vec!["redis".to_string(), "custom acme/db:2 5432".to_string()],
            env: vec!["GOFLAGS=-mod=vendor".to_string()],
            ..Default::default()
        };
        assert!(check(&build, &ImageRegistry::default()).is_empty());
    }

    #[test]
    fn test_reports_every_problem() {
        let build = BuildScript {
            services: vec!["nosuchservice".to_string(), "a b c d".to_string()],
            env: vec!["NOVALUE".to_string()],
            ..Default::default()
        };
        let problems = check(&build, &ImageRegistry::default());
        assert_eq!(problems.len(), 5);
        assert!(problems[0].contains("no build image"));
        assert!(problems[2].contains("nosuchservice"));
    }
}
