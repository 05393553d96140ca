//! Cache volumes
//!
//! A cache volume is a host directory bound into the build container so a
//! path survives across builds of the same repository and branch. Host
//! directories live under a cache root, keyed by repository name, branch
//! and the volume's in-container path.
//!
//! Builds of the same repository and branch share a directory; no lock is
//! taken, concurrent builds on one branch see each other's writes.

use keel_core::domain::Repo;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "KEEL_CACHE_DIR";

/// Cache root used when the override is unset
pub const DEFAULT_CACHE_ROOT: &str = "/tmp/keel";

/// Resolves the cache root from the environment
pub fn resolve_root() -> PathBuf {
    match std::env::var(CACHE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_CACHE_ROOT),
    }
}

/// A cache volume resolved to its host and container paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMount {
    pub host: PathBuf,
    pub container: String,
}

impl CacheMount {
    /// Resolves `volume` for a build of `repo`
    ///
    /// Relative volumes are taken relative to the repository's working
    /// directory inside the container. The host path never escapes `root`.
    pub fn new(root: &Path, repo: &Repo, volume: &str) -> Self {
        let mut container = clean(volume);
        if !container.starts_with('/') {
            container = clean(&format!("{}/{}", repo.dir, container));
        }

        let mut host = root.to_path_buf();
        for part in [repo.name.as_str(), repo.branch.as_str(), container.as_str()] {
            push_components(&mut host, part);
        }

        Self { host, container }
    }

    /// Bind specification in `<host>:<container>` form
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

fn push_components(path: &mut PathBuf, part: &str) {
    for component in part.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            continue;
        }
        path.push(component);
    }
}

/// Lexically normalizes a slash separated path
fn clean(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") | None if !absolute => parts.push(".."),
                Some(&"..") | None => {}
                Some(_) => {
                    parts.pop();
                }
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repo {
        Repo {
            name: "github.com/acme/widget".to_string(),
            branch: "main".to_string(),
            dir: "/var/cache/keel/src/github.com/acme/widget".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("/a/b/../c/./d/"), "/a/c/d");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("a/../../b"), "../b");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("/"), "/");
    }

    #[test]
    fn test_absolute_volume() {
        let mount = CacheMount::new(Path::new("/tmp/keel"), &repo(), "/root/.m2/");
        assert_eq!(mount.container, "/root/.m2");
        assert_eq!(
            mount.host,
            PathBuf::from("/tmp/keel/github.com/acme/widget/main/root/.m2")
        );
        assert_eq!(
            mount.bind(),
            "/tmp/keel/github.com/acme/widget/main/root/.m2:/root/.m2"
        );
    }

    #[test]
    fn test_relative_volume_is_deterministic() {
        let root = Path::new("/srv/cache");
        let first = CacheMount::new(root, &repo(), "node_modules");
        let second = CacheMount::new(root, &repo(), "./node_modules");
        assert_eq!(first, second);
        assert_eq!(
            first.container,
            "/var/cache/keel/src/github.com/acme/widget/node_modules"
        );
        assert_eq!(
            first.host,
            PathBuf::from(
                "/srv/cache/github.com/acme/widget/main/var/cache/keel/src/github.com/acme/widget/node_modules"
            )
        );
    }

    #[test]
    fn test_host_path_stays_under_root() {
        let hostile = Repo {
            name: "../../etc".to_string(),
            branch: "../..".to_string(),
            ..repo()
        };
        let mount = CacheMount::new(Path::new("/tmp/keel"), &hostile, "/x");
        assert!(mount.host.starts_with("/tmp/keel"));
        assert_eq!(mount.host, PathBuf::from("/tmp/keel/etc/x"));
    }
}
