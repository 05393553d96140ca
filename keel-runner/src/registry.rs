//! Service image registry
//!
//! Maps builder aliases (e.g. "go1.22") to base images and service names
//! (e.g. "redis") to runnable images. Also parses ad hoc service
//! declarations. The registry is immutable configuration: it is built once
//! and shared with every builder through an `Arc`.

use keel_core::domain::ImageSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors from service resolution and registry loading
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Single-token declaration that names no registry service
    #[error("invalid or unknown service {0}")]
    UnknownService(String),

    /// Declaration with an unsupported number of tokens
    #[error("invalid service declaration {0:?}")]
    InvalidService(String),

    /// Registry file could not be read or parsed
    #[error("failed to load registry from {path}: {message}")]
    Load { path: String, message: String },
}

/// Serializable registry contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Builder aliases: alias -> image
    pub builders: HashMap<String, ImageSpec>,

    /// Named services: name -> image
    pub services: HashMap<String, ImageSpec>,

    /// Image name prefixes of the official image family
    pub official_prefixes: Vec<String>,
}

/// Immutable registry of builder aliases and service images
#[derive(Debug, Clone)]
pub struct ImageRegistry {
    builders: HashMap<String, ImageSpec>,
    services: HashMap<String, ImageSpec>,
    official_prefixes: Vec<String>,
}

impl ImageRegistry {
    /// Creates a registry from explicit contents
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            builders: config.builders,
            services: config.services,
            official_prefixes: config.official_prefixes,
        }
    }

    /// Loads a JSON registry file and layers it over the built-in table
    ///
    /// Entries in the file replace built-in entries of the same name.
    /// An empty `official_prefixes` list keeps the built-in prefixes.
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let load_error = |message: String| RegistryError::Load {
            path: path.display().to_string(),
            message,
        };

        let source = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let overrides: RegistryConfig =
            serde_json::from_str(&source).map_err(|e| load_error(e.to_string()))?;

        let mut registry = Self::default();
        registry.builders.extend(overrides.builders);
        registry.services.extend(overrides.services);
        if !overrides.official_prefixes.is_empty() {
            registry.official_prefixes = overrides.official_prefixes;
        }
        Ok(registry)
    }

    /// Substitutes a builder alias with its canonical image tag
    ///
    /// Names that are not aliases are returned unchanged.
    pub fn resolve_builder<'a>(&'a self, image: &'a str) -> &'a str {
        self.builders
            .get(image)
            .map(|alias| alias.tag.as_str())
            .unwrap_or(image)
    }

    /// Resolves a service declaration
    ///
    /// - `"redis"`: registry lookup by name
    /// - `"custom redis:7"`: ad hoc image named "custom", no ports
    /// - `"custom redis:7 6379,6380"`: ad hoc image with ports
    pub fn resolve_service(&self, declaration: &str) -> Result<ImageSpec, RegistryError> {
        let tokens: Vec<&str> = declaration.split_whitespace().collect();
        match tokens.as_slice() {
            [name] => self
                .services
                .get(*name)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownService(name.to_string())),
            [name, tag] => Ok(ImageSpec::new(*name, *tag, &[])),
            [name, tag, ports] => Ok(ImageSpec {
                name: name.to_string(),
                tag: tag.to_string(),
                ports: ports
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            _ => Err(RegistryError::InvalidService(declaration.to_string())),
        }
    }

    /// True when the image belongs to the official image family
    pub fn is_official(&self, image: &str) -> bool {
        self.official_prefixes.iter().any(|p| image.starts_with(p))
    }

    /// Builder aliases sorted by name
    pub fn builders(&self) -> Vec<(&str, &ImageSpec)> {
        sorted(&self.builders)
    }

    /// Registry services sorted by name
    pub fn services(&self) -> Vec<(&str, &ImageSpec)> {
        sorted(&self.services)
    }
}

fn sorted(map: &HashMap<String, ImageSpec>) -> Vec<(&str, &ImageSpec)> {
    let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.as_str(), v)).collect();
    entries.sort_by_key(|(name, _)| *name);
    entries
}

impl Default for ImageRegistry {
    fn default() -> Self {
        let builders = [
            ImageSpec::new("go1.21", "keel/go:1.21", &[]),
            ImageSpec::new("go1.22", "keel/go:1.22", &[]),
            ImageSpec::new("node18", "keel/node:18", &[]),
            ImageSpec::new("node20", "keel/node:20", &[]),
            ImageSpec::new("python3.11", "keel/python:3.11", &[]),
            ImageSpec::new("python3.12", "keel/python:3.12", &[]),
            ImageSpec::new("ruby3.3", "keel/ruby:3.3", &[]),
            ImageSpec::new("rust", "keel/rust:stable", &[]),
            ImageSpec::new("openjdk21", "keel/openjdk:21", &[]),
        ];

        let services = [
            ImageSpec::new("cassandra", "cassandra:4.1", &["9042", "7000"]),
            ImageSpec::new("couchdb", "couchdb:3", &["5984"]),
            ImageSpec::new("elasticsearch", "elasticsearch:8.13.0", &["9200"]),
            ImageSpec::new("memcached", "memcached:1.6", &["11211"]),
            ImageSpec::new("mongodb", "mongo:7", &["27017"]),
            ImageSpec::new("mysql", "mysql:8.0", &["3306"]),
            ImageSpec::new("neo4j", "neo4j:5", &["7474", "7687"]),
            ImageSpec::new("postgres", "postgres:16", &["5432"]),
            ImageSpec::new("rabbitmq", "rabbitmq:3", &["5672", "15672"]),
            ImageSpec::new("redis", "redis:7", &["6379"]),
            ImageSpec::new("zookeeper", "zookeeper:3.9", &["2181"]),
        ];

        Self::new(RegistryConfig {
            builders: builders.into_iter().map(|i| (i.name.clone(), i)).collect(),
            services: services.into_iter().map(|i| (i.name.clone(), i)).collect(),
            official_prefixes: vec!["keel/".to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_service() {
        let registry = ImageRegistry::default();
        let image = registry.resolve_service("redis").unwrap();
        assert_eq!(image.name, "redis");
        assert_eq!(image.tag, "redis:7");
        assert_eq!(image.ports, vec!["6379"]);
    }

    #[test]
    fn test_ad_hoc_service_without_ports() {
        let image = ImageRegistry::default()
            .resolve_service("custom redis:2.8")
            .unwrap();
        assert_eq!(image.name, "custom");
        assert_eq!(image.tag, "redis:2.8");
        assert!(image.ports.is_empty());
    }

    #[test]
    fn test_ad_hoc_service_with_ports() {
        let image = ImageRegistry::default()
            .resolve_service("custom redis:2.8 6379,6380")
            .unwrap();
        assert_eq!(image.ports, vec!["6379", "6380"]);
    }

    #[test]
    fn test_invalid_declarations() {
        let registry = ImageRegistry::default();
        assert!(matches!(
            registry.resolve_service("a b c d"),
            Err(RegistryError::InvalidService(_))
        ));
        assert!(matches!(
            registry.resolve_service(""),
            Err(RegistryError::InvalidService(_))
        ));
        assert!(matches!(
            registry.resolve_service("nosuchservice"),
            Err(RegistryError::UnknownService(_))
        ));
    }

    #[test]
    fn test_resolve_builder_alias() {
        let registry = ImageRegistry::default();
        assert_eq!(registry.resolve_builder("go1.22"), "keel/go:1.22");
        assert_eq!(registry.resolve_builder("ubuntu:22.04"), "ubuntu:22.04");
    }

    #[test]
    fn test_official_family() {
        let registry = ImageRegistry::default();
        assert!(registry.is_official("keel/go:1.22"));
        assert!(!registry.is_official("golang:1.22"));
    }

    #[test]
    fn test_from_file_overrides_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{
                "services": {"redis": {"name": "redis", "tag": "redis:6", "ports": ["6379"]}},
                "builders": {"go": {"name": "go", "tag": "golang:1.22"}}
            }"#,
        )
        .unwrap();

        let registry = ImageRegistry::from_file(&path).unwrap();
        assert_eq!(registry.resolve_service("redis").unwrap().tag, "redis:6");
        assert_eq!(registry.resolve_builder("go"), "golang:1.22");
        assert!(registry.resolve_service("postgres").is_ok());
        assert!(registry.is_official("keel/node:20"));
    }

    #[test]
    fn test_from_file_missing() {
        let result = ImageRegistry::from_file(Path::new("/nonexistent/registry.json"));
        assert!(matches!(result, Err(RegistryError::Load { .. })));
    }
}
