//! Engine configuration
//!
//! Defines the tunables of the build engine: worker concurrency, the default
//! build time limit, where cache volumes live and which container runtime
//! to drive.

use std::path::PathBuf;
use std::time::Duration;

use crate::builder::DEFAULT_STOP_GRACE;
use crate::cache;

/// Default build time limit: 300 minutes
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300 * 60);

/// Default container runtime binary
pub const DEFAULT_RUNTIME: &str = "docker";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of builds that may run at once
    pub concurrency: usize,

    /// Time limit applied to builds that do not carry their own
    pub build_timeout: Duration,

    /// Host directory holding cache volumes
    pub cache_root: PathBuf,

    /// Container runtime binary (e.g. "docker", "podman")
    pub runtime_binary: String,

    /// Grace period before stopped containers are killed
    pub stop_grace: Duration,

    /// Optional JSON file layered over the built-in image registry
    pub registry_file: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration with defaults
    ///
    /// Concurrency defaults to the number of CPUs.
    pub fn new() -> Self {
        Self {
            concurrency: default_concurrency(),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            cache_root: PathBuf::from(cache::DEFAULT_CACHE_ROOT),
            runtime_binary: DEFAULT_RUNTIME.to_string(),
            stop_grace: DEFAULT_STOP_GRACE,
            registry_file: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - KEEL_CONCURRENCY (default: number of CPUs)
    /// - KEEL_BUILD_TIMEOUT (seconds, default: 18000)
    /// - KEEL_CACHE_DIR (default: /tmp/keel)
    /// - KEEL_RUNTIME (default: docker)
    /// - KEEL_STOP_GRACE (seconds, default: 15)
    /// - KEEL_REGISTRY (path to a registry JSON file)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let concurrency = parse_env::<usize>("KEEL_CONCURRENCY")?.unwrap_or(defaults.concurrency);

        let build_timeout = parse_env::<u64>("KEEL_BUILD_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.build_timeout);

        let stop_grace = parse_env::<u64>("KEEL_STOP_GRACE")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.stop_grace);

        let runtime_binary = std::env::var("KEEL_RUNTIME")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.runtime_binary);

        let registry_file = std::env::var("KEEL_REGISTRY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            concurrency,
            build_timeout,
            cache_root: cache::resolve_root(),
            runtime_binary,
            stop_grace,
            registry_file,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.build_timeout.is_zero() {
            anyhow::bail!("build_timeout must be greater than 0");
        }

        if self.runtime_binary.is_empty() {
            anyhow::bail!("runtime_binary cannot be empty");
        }

        if !self.cache_root.is_absolute() {
            anyhow::bail!("cache_root must be an absolute path");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Reads and parses an optional variable; set but malformed is an error
fn parse_env<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} is not valid: {:?}", name, value)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.concurrency >= 1);
        assert_eq!(config.build_timeout, Duration::from_secs(18000));
        assert_eq!(config.stop_grace, Duration::from_secs(15));
        assert_eq!(config.runtime_binary, "docker");
        assert_eq!(config.cache_root, PathBuf::from("/tmp/keel"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());
        config.concurrency = 2;

        config.build_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.build_timeout = Duration::from_secs(60);

        config.cache_root = PathBuf::from("relative/cache");
        assert!(config.validate().is_err());
        config.cache_root = PathBuf::from("/var/cache/keel");

        config.runtime_binary = String::new();
        assert!(config.validate().is_err());
        config.runtime_binary = "podman".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_env_unset() {
        let value = parse_env::<u64>("KEEL_TEST_SURELY_UNSET_VARIABLE").unwrap();
        assert_eq!(value, None);
    }
}
