//! Image definition generator

use keel_core::domain::Repo;

use super::{BUILD_SCRIPT, CACHE_DIR, IDENTITY_FILE, INIT_DIR, PROXY_SCRIPT, SOURCE_DIR};

const OFFICIAL_USER: &str = "ubuntu";
const OFFICIAL_HOME: &str = "/home/ubuntu";

/// Dockerfile builder
#[derive(Debug, Clone)]
pub struct Dockerfile {
    buf: String,
}

impl Dockerfile {
    pub fn new(from: &str) -> Self {
        Self {
            buf: format!("FROM {}\n", from),
        }
    }

    pub fn write_workdir(&mut self, dir: &str) {
        self.line("WORKDIR", dir);
    }

    pub fn write_add(&mut self, from: &str, to: &str) {
        self.line("ADD", &format!("{} {}", from, to));
    }

    pub fn write_user(&mut self, user: &str) {
        self.line("USER", user);
    }

    pub fn write_env(&mut self, key: &str, value: &str) {
        self.line("ENV", &format!("{} {}", key, value));
    }

    pub fn write_run(&mut self, command: &str) {
        self.line("RUN", command);
    }

    /// Writes an exec form entrypoint
    pub fn write_entrypoint(&mut self, args: &[&str]) {
        let args: Vec<String> = args.iter().map(|a| format!("\"{}\"", a)).collect();
        self.line("ENTRYPOINT", &format!("[{}]", args.join(", ")));
    }

    fn line(&mut self, instruction: &str, args: &str) {
        self.buf.push_str(instruction);
        self.buf.push(' ');
        self.buf.push_str(args);
        self.buf.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }
}

/// Generates the image definition for a build
///
/// # Arguments
/// * `image` - Resolved base image
/// * `repo` - Repository under build
/// * `official` - Whether `image` belongs to the official image family
pub fn generate(image: &str, repo: &Repo, official: bool) -> Dockerfile {
    let mut f = Dockerfile::new(image);
    let script_path = format!("/usr/local/bin/{}", BUILD_SCRIPT);

    f.write_workdir(&repo.dir);
    f.write_add(BUILD_SCRIPT, "/usr/local/bin/");

    // remote repositories are cloned by the build script
    if repo.is_local() {
        f.write_add(SOURCE_DIR, &repo.dir);
    }

    if official {
        let key_path = format!("{}/.ssh/{}", OFFICIAL_HOME, IDENTITY_FILE);
        let owner = format!("{0}:{0}", OFFICIAL_USER);

        f.write_user(OFFICIAL_USER);
        f.write_env("HOME", OFFICIAL_HOME);
        f.write_env("LANG", "en_US.UTF-8");
        f.write_env("LANGUAGE", "en_US:en");
        f.write_env("LOGNAME", OFFICIAL_USER);
        f.write_env("TERM", "xterm");
        f.write_env("SHELL", "/bin/bash");
        f.write_add(IDENTITY_FILE, &key_path);
        f.write_run(&format!("sudo chown -R {} {}/.ssh", owner, OFFICIAL_HOME));
        f.write_run(&format!("sudo chown -R {} {}", owner, CACHE_DIR));
        f.write_run(&format!("sudo chown -R {} {}", owner, script_path));
        f.write_run(&format!("sudo chmod 600 {}", key_path));
    } else {
        let key_path = format!("/root/.ssh/{}", IDENTITY_FILE);

        f.write_user("root");
        f.write_env("HOME", "/root");
        f.write_env("LANG", "en_US.UTF-8");
        f.write_env("LANGUAGE", "en_US:en");
        f.write_env("LOGNAME", "root");
        f.write_env("TERM", "xterm");
        f.write_env("SHELL", "/bin/bash");
        f.write_env("GOPATH", CACHE_DIR);
        f.write_add(IDENTITY_FILE, &key_path);
        f.write_run(&format!("chmod 600 {}", key_path));
        f.write_run("echo 'StrictHostKeyChecking no' > /root/.ssh/config");
    }

    f.write_add(PROXY_SCRIPT, &format!("{}/", INIT_DIR));
    f.write_entrypoint(&["/bin/bash", "-e", &script_path]);

    f
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(path: &str) -> Repo {
        Repo {
            name: "github.com/acme/widget".to_string(),
            path: path.to_string(),
            dir: "/var/cache/keel/src/github.com/acme/widget".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_local_repo_adds_source() {
        let f = generate("ubuntu:22.04", &repo("/home/dev/widget"), false);
        let text = f.as_str();
        assert!(text.starts_with("FROM ubuntu:22.04\n"));
        assert!(text.contains("WORKDIR /var/cache/keel/src/github.com/acme/widget\n"));
        assert!(text.contains("ADD src /var/cache/keel/src/github.com/acme/widget\n"));
    }

    #[test]
    fn test_remote_repo_does_not_add_source() {
        let f = generate("ubuntu:22.04", &repo("git://github.com/acme/widget.git"), false);
        assert!(!f.as_str().contains("ADD src "));
    }

    #[test]
    fn test_official_image_runs_as_ubuntu() {
        let f = generate("keel/go:1.22", &repo("/home/dev/widget"), true);
        let text = f.as_str();
        assert!(text.contains("USER ubuntu\n"));
        assert!(text.contains("ENV HOME /home/ubuntu\n"));
        assert!(text.contains("ADD id_rsa /home/ubuntu/.ssh/id_rsa\n"));
        assert!(text.contains("RUN sudo chmod 600 /home/ubuntu/.ssh/id_rsa\n"));
        assert!(!text.contains("GOPATH"));
    }

    #[test]
    fn test_other_image_runs_as_root() {
        let f = generate("golang:1.22", &repo("/home/dev/widget"), false);
        let text = f.as_str();
        assert!(text.contains("USER root\n"));
        assert!(text.contains("ENV GOPATH /var/cache/keel\n"));
        assert!(text.contains("ADD id_rsa /root/.ssh/id_rsa\n"));
        assert!(text.contains("RUN echo 'StrictHostKeyChecking no' > /root/.ssh/config\n"));
    }

    #[test]
    fn test_proxy_and_entrypoint_are_last() {
        let f = generate("golang:1.22", &repo("/home/dev/widget"), false);
        let lines: Vec<&str> = f.as_str().lines().collect();
        let n = lines.len();
        assert_eq!(lines[n - 2], "ADD proxy.sh /etc/keel.d/");
        assert_eq!(
            lines[n - 1],
            r#"ENTRYPOINT ["/bin/bash", "-e", "/usr/local/bin/keel-build"]"#
        );
    }
}
