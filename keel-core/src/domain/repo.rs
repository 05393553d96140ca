//! Repository domain types

use serde::{Deserialize, Serialize};

/// Default clone depth for remote repositories
pub const DEFAULT_DEPTH: u32 = 50;

const REMOTE_PREFIXES: &[&str] = &["git://", "git@", "http://", "https://", "ssh://"];

/// Repository under build
///
/// `path` is either a directory on the host (local repository, copied into
/// the build context) or a clone URL (remote repository, cloned by the
/// build script inside the container).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    /// Repository name, e.g. "github.com/acme/widget"
    pub name: String,

    /// Local path or clone URL
    pub path: String,

    pub branch: String,
    pub commit: String,

    /// Pull request number, empty when this is not a pull request build
    pub pr: String,

    /// Working directory inside the build container
    pub dir: String,

    /// Clone depth for remote repositories
    pub depth: u32,
}

impl Default for Repo {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            branch: String::new(),
            commit: String::new(),
            pr: String::new(),
            dir: String::new(),
            depth: DEFAULT_DEPTH,
        }
    }
}

impl Repo {
    /// True when `path` is a clone URL
    pub fn is_remote(&self) -> bool {
        REMOTE_PREFIXES.iter().any(|p| self.path.starts_with(p))
    }

    /// True when `path` is a directory on the host
    pub fn is_local(&self) -> bool {
        !self.is_remote()
    }

    pub fn is_pull_request(&self) -> bool {
        !self.pr.is_empty()
    }

    /// Commands that materialize a remote repository inside the container
    pub fn commands(&self) -> Vec<String> {
        let branch = if self.branch.is_empty() {
            "master"
        } else {
            self.branch.as_str()
        };

        let mut cmds = Vec::new();
        if self.is_pull_request() {
            cmds.push(format!(
                "git clone --depth={} --recursive {} {}",
                self.depth, self.path, self.dir
            ));
            cmds.push(format!(
                "git fetch origin +refs/pull/{pr}/head:refs/remotes/origin/pr/{pr}",
                pr = self.pr
            ));
            cmds.push(format!(
                "git checkout -qf -b pr/{pr} origin/pr/{pr}",
                pr = self.pr
            ));
        } else {
            cmds.push(format!(
                "git clone --depth={} --recursive --branch={} {} {}",
                self.depth, branch, self.path, self.dir
            ));
            if !self.commit.is_empty() {
                cmds.push(format!("git checkout -qf {}", self.commit));
            }
        }
        cmds
    }
}
