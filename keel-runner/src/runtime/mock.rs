//! In-memory container runtime for tests
//!
//! Records every call in order and tracks which containers and images are
//! still alive, so tests can assert on call ordering and on leaks.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::{
    ContainerConfig, ContainerInfo, ContainerRuntime, ImageInfo, OutputSink, RuntimeError,
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    next_id: u32,
    missing_images: HashSet<String>,
    failing_service_inspect: HashSet<String>,
    fail_build: bool,
    fail_built_image_inspect: bool,
    fail_attach: bool,
    fail_start: bool,
    create_delay: Duration,
    fail_stop: bool,
    exit_code: i32,
    run_time: Duration,
    output: Vec<u8>,
    /// container id -> image
    containers: HashMap<String, String>,
    /// service container id -> published ports
    service_ports: HashMap<String, Vec<String>>,
    images: HashSet<String>,
    created_configs: Vec<ContainerConfig>,
    build_contexts: Vec<HashMap<String, Vec<u8>>>,
}

/// Recording runtime with configurable failures
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `image` as missing until it is pulled
    pub fn with_missing_image(self, image: &str) -> Self {
        self.state.lock().unwrap().missing_images.insert(image.to_string());
        self
    }

    /// Fails container inspection for services started from `image`
    pub fn with_failing_service_inspect(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_service_inspect
            .insert(image.to_string());
        self
    }

    pub fn with_failing_build(self) -> Self {
        self.state.lock().unwrap().fail_build = true;
        self
    }

    pub fn with_failing_built_image_inspect(self) -> Self {
        self.state.lock().unwrap().fail_built_image_inspect = true;
        self
    }

    pub fn with_failing_attach(self) -> Self {
        self.state.lock().unwrap().fail_attach = true;
        self
    }

    /// How long container creation takes once the container exists
    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().create_delay = delay;
        self
    }

    pub fn with_failing_start(self) -> Self {
        self.state.lock().unwrap().fail_start = true;
        self
    }

    pub fn with_failing_stop(self) -> Self {
        self.state.lock().unwrap().fail_stop = true;
        self
    }

    pub fn with_exit_code(self, code: i32) -> Self {
        self.state.lock().unwrap().exit_code = code;
        self
    }

    /// How long the build container runs before exiting
    pub fn with_run_time(self, run_time: Duration) -> Self {
        self.state.lock().unwrap().run_time = run_time;
        self
    }

    /// Output written to the attached sink
    pub fn with_output(self, output: &[u8]) -> Self {
        self.state.lock().unwrap().output = output.to_vec();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Index of the first call starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Containers created or run and not yet removed
    pub fn live_containers(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Images built and not yet removed
    pub fn live_images(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }

    pub fn created_configs(&self) -> Vec<ContainerConfig> {
        self.state.lock().unwrap().created_configs.clone()
    }

    /// Snapshots of each build context: file name -> contents
    pub fn build_contexts(&self) -> Vec<HashMap<String, Vec<u8>>> {
        self.state.lock().unwrap().build_contexts.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("{}{}", prefix, state.next_id)
    }
}

fn snapshot(dir: &Path, root: &Path, files: &mut HashMap<String, Vec<u8>>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            snapshot(&path, root, files);
        } else {
            let name = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
            files.insert(name, std::fs::read(&path).unwrap());
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect_image(&self, name: &str) -> Result<ImageInfo, RuntimeError> {
        self.record(format!("inspect_image {}", name));
        let state = self.state.lock().unwrap();
        if state.missing_images.contains(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        if state.fail_built_image_inspect && state.images.contains(name) {
            return Err(RuntimeError::Parse("corrupt image".to_string()));
        }
        Ok(ImageInfo {
            id: format!("sha256:{}", name),
        })
    }

    async fn pull_image(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull_image {}", name));
        self.state.lock().unwrap().missing_images.remove(name);
        Ok(())
    }

    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<(), RuntimeError> {
        self.record(format!("build_image {}", tag));
        let mut files = HashMap::new();
        snapshot(context_dir, context_dir, &mut files);

        let mut state = self.state.lock().unwrap();
        state.build_contexts.push(files);
        if state.fail_build {
            return Err(RuntimeError::CommandFailed {
                command: "build".to_string(),
                code: 1,
                stderr: "build failed".to_string(),
            });
        }
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_image {}", id));
        let tag = id.trim_start_matches("sha256:");
        self.state.lock().unwrap().images.remove(tag);
        Ok(())
    }

    async fn run_daemon(&self, image: &str, ports: &[String]) -> Result<String, RuntimeError> {
        self.record(format!("run_daemon {} {}", image, ports.join(",")));
        let id = self.next_id("svc");
        let mut state = self.state.lock().unwrap();
        state.containers.insert(id.clone(), image.to_string());
        state.service_ports.insert(id.clone(), ports.to_vec());
        Ok(id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        self.record(format!("inspect_container {}", id));
        let state = self.state.lock().unwrap();
        let image = state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if state.failing_service_inspect.contains(&image) {
            return Err(RuntimeError::Parse("inspect failed".to_string()));
        }
        Ok(ContainerInfo {
            id: id.to_string(),
            name: format!("{}_name", id),
            ip_address: format!("172.17.0.{}", id.trim_start_matches("svc")),
            ports: state.service_ports.get(id).cloned().unwrap_or_default(),
        })
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        self.record(format!("create_container {}", config.image));
        let id = self.next_id("build");
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.containers.insert(id.clone(), config.image.clone());
            state.created_configs.push(config.clone());
            state.create_delay
        };
        tokio::time::sleep(delay).await;
        Ok(id)
    }

    async fn attach(&self, id: &str, mut sink: OutputSink) -> Result<(), RuntimeError> {
        self.record(format!("attach {}", id));
        let (fail, output) = {
            let state = self.state.lock().unwrap();
            (state.fail_attach, state.output.clone())
        };
        if fail {
            return Err(RuntimeError::CommandFailed {
                command: "attach".to_string(),
                code: 1,
                stderr: "cannot attach".to_string(),
            });
        }
        tokio::spawn(async move {
            let _ = sink.write_all(&output).await;
            let _ = sink.flush().await;
        });
        Ok(())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start_container {}", id));
        if self.state.lock().unwrap().fail_start {
            return Err(RuntimeError::CommandFailed {
                command: "start".to_string(),
                code: 125,
                stderr: "cannot start".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i32, RuntimeError> {
        self.record(format!("wait_container {}", id));
        let (run_time, exit_code) = {
            let state = self.state.lock().unwrap();
            (state.run_time, state.exit_code)
        };
        tokio::time::sleep(run_time).await;
        Ok(exit_code)
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        self.record(format!("stop_container {} {}", id, grace.as_secs()));
        if self.state.lock().unwrap().fail_stop {
            return Err(RuntimeError::CommandFailed {
                command: "stop".to_string(),
                code: 1,
                stderr: "cannot stop".to_string(),
            });
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_container {}", id));
        self.state.lock().unwrap().containers.remove(id);
        Ok(())
    }
}
