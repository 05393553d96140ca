//! Image domain types

use serde::{Deserialize, Serialize};

/// Runnable image coordinates
///
/// `name` is the symbolic name other containers link to (e.g. "redis"),
/// `tag` is what the runtime pulls and runs (e.g. "redis:7").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

impl ImageSpec {
    pub fn new(name: impl Into<String>, tag: impl Into<String>, ports: &[&str]) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
        }
    }
}
