//! Build script generator

use keel_core::domain::{BuildScript, CommandWriter, Repo};

use super::{INIT_DIR, shell_quote};

/// Shell script executed as the build container's entrypoint
///
/// Starts with a header that sources every script in the init directory
/// (which is how the proxy script runs) and prepares the SSH directory.
/// Every command is echoed before it runs so the build output reads like
/// a terminal session.
#[derive(Debug, Clone)]
pub struct Buildfile {
    buf: String,
}

impl Buildfile {
    pub fn new() -> Self {
        let mut buf = String::from("#!/bin/bash\nset +e\n\n");
        buf.push_str(&format!(
            "if [ -d {dir} ]; then\n  for i in {dir}/*.sh; do\n    if [ -r $i ]; then\n      . $i\n    fi\n  done\n  unset i\nfi\n\n",
            dir = INIT_DIR
        ));
        buf.push_str("if [ ! -d $HOME/.ssh ]; then\n  mkdir -p $HOME/.ssh\nfi\nchmod 0700 $HOME/.ssh\n\n");
        buf.push_str("set -e\n");
        Self { buf }
    }

    /// Appends a line to `/etc/hosts`, through sudo when it is available
    pub fn write_host(&mut self, mapping: &str) {
        let line = shell_quote(mapping);
        self.buf.push_str(&format!(
            "[ -f /usr/bin/sudo ] || echo {line} | tee -a /etc/hosts > /dev/null\n"
        ));
        self.buf.push_str(&format!(
            "[ -f /usr/bin/sudo ] && echo {line} | sudo tee -a /etc/hosts > /dev/null\n"
        ));
    }

    /// Exports a value taken literally, with no shell expansion
    pub fn write_literal_env(&mut self, key: &str, value: &str) {
        self.buf
            .push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }
}

impl Default for Buildfile {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandWriter for Buildfile {
    /// Exports a user assignment verbatim so `$VAR` references expand
    fn write_env(&mut self, key: &str, value: &str) {
        self.buf.push_str(&format!("export {}={}\n", key, value));
    }

    fn write_cmd(&mut self, command: &str) {
        self.buf
            .push_str(&format!("echo {}\n", shell_quote(&format!("$ {}", command))));
        self.buf.push_str(command);
        self.buf.push('\n');
    }
}

/// Generates the build script for a build of `repo`
///
/// Pull request builds only run the build stage: deploy and publish
/// commands may carry credentials and never run against untrusted code.
pub fn generate(build: &BuildScript, repo: &Repo) -> Buildfile {
    let mut f = Buildfile::new();

    f.write_literal_env("CI", "true");
    f.write_literal_env("KEEL", "true");
    f.write_literal_env("KEEL_BRANCH", &repo.branch);
    f.write_literal_env("KEEL_COMMIT", &repo.commit);
    f.write_literal_env("KEEL_PR", &repo.pr);
    f.write_literal_env("KEEL_BUILD_DIR", &repo.dir);

    for mapping in &build.hosts {
        f.write_host(mapping);
    }

    if repo.is_remote() {
        for command in repo.commands() {
            f.write_cmd(&command);
        }
    }

    if repo.is_pull_request() {
        build.write_build(&mut f);
    } else {
        build.write(&mut f);
    }

    f
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> BuildScript {
        BuildScript {
            image: "go1.22".to_string(),
            env: vec!["GO111MODULE=on".to_string()],
            script: vec!["go build".to_string(), "go test ./...".to_string()],
            deploy: vec!["./scripts/deploy.sh production".to_string()],
            publish: vec!["docker push acme/widget".to_string()],
            hosts: vec!["10.0.0.5 db.internal".to_string()],
            ..Default::default()
        }
    }

    fn local_repo() -> Repo {
        Repo {
            name: "github.com/acme/widget".to_string(),
            path: "/home/dev/widget".to_string(),
            branch: "main".to_string(),
            commit: "abc123".to_string(),
            dir: "/var/cache/keel/src/github.com/acme/widget".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_environment_is_exported() {
        let script = generate(&build(), &local_repo());
        let text = script.as_str();
        assert!(text.starts_with("#!/bin/bash\n"));
        assert!(text.contains("export CI='true'\n"));
        assert!(text.contains("export KEEL='true'\n"));
        assert!(text.contains("export KEEL_BRANCH='main'\n"));
        assert!(text.contains("export KEEL_COMMIT='abc123'\n"));
        assert!(text.contains("export KEEL_PR=''\n"));
        assert!(text.contains("export KEEL_BUILD_DIR='/var/cache/keel/src/github.com/acme/widget'\n"));
        assert!(text.contains("export GO111MODULE=on\n"));
    }

    #[test]
    fn test_user_environment_expands() {
        let build = BuildScript {
            env: vec!["PATH=$PATH:/opt/go/bin".to_string()],
            ..build()
        };
        let script = generate(&build, &local_repo());
        let text = script.as_str();
        assert!(text.contains("export PATH=$PATH:/opt/go/bin\n"));
        assert!(!text.contains("'$PATH"));
    }

    #[test]
    fn test_engine_values_stay_literal() {
        let repo = Repo {
            branch: "feature/$(id)".to_string(),
            ..local_repo()
        };
        let script = generate(&build(), &repo);
        assert!(script.as_str().contains("export KEEL_BRANCH='feature/$(id)'\n"));
    }

    #[test]
    fn test_commands_are_echoed_then_run() {
        let script = generate(&build(), &local_repo());
        assert!(script.as_str().contains("echo '$ go build'\ngo build\n"));
    }

    #[test]
    fn test_hosts_are_appended() {
        let script = generate(&build(), &local_repo());
        assert!(
            script
                .as_str()
                .contains("echo '10.0.0.5 db.internal' | sudo tee -a /etc/hosts")
        );
    }

    #[test]
    fn test_branch_build_runs_every_stage() {
        let script = generate(&build(), &local_repo());
        let text = script.as_str();
        assert!(text.contains("./scripts/deploy.sh production\n"));
        assert!(text.contains("docker push acme/widget\n"));
    }

    #[test]
    fn test_pull_request_build_skips_deploy_and_publish() {
        let repo = Repo {
            pr: "17".to_string(),
            ..local_repo()
        };
        let script = generate(&build(), &repo);
        let text = script.as_str();
        assert!(text.contains("go test ./...\n"));
        assert!(!text.contains("deploy.sh"));
        assert!(!text.contains("docker push"));
    }

    #[test]
    fn test_local_repo_has_no_clone_commands() {
        let script = generate(&build(), &local_repo());
        assert!(!script.as_str().contains("git clone"));
    }

    #[test]
    fn test_remote_repo_clones_before_building() {
        let repo = Repo {
            path: "https://github.com/acme/widget.git".to_string(),
            ..local_repo()
        };
        let script = generate(&build(), &repo);
        let text = script.as_str();
        let clone = text.find("git clone --depth=50").unwrap();
        let checkout = text.find("git checkout -qf abc123").unwrap();
        let first_build = text.find("\ngo build\n").unwrap();
        assert!(clone < checkout && checkout < first_build);
    }
}
