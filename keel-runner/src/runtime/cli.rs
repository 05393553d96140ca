//! Command line container runtime
//!
//! Implements `ContainerRuntime` on top of a Docker-compatible CLI:
//! - Every operation is one invocation of the binary (`docker` or `podman`)
//! - Inspection output is parsed as JSON
//! - Attached output is streamed from a `start --attach` client process

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    ContainerConfig, ContainerInfo, ContainerRuntime, ImageInfo, OutputSink, RuntimeError,
};

const START_POLL_INTERVAL: Duration = Duration::from_millis(100);
const START_TIMEOUT: Duration = Duration::from_secs(60);

/// How long an exited container's output may take to finish draining
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Container runtime backed by a Docker-compatible command line
pub struct CliRuntime {
    binary: String,

    /// Sinks registered by `attach`, consumed by `start_container`
    attached: Mutex<HashMap<String, OutputSink>>,

    /// Output pumps and attached client of each started container
    streams: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl CliRuntime {
    /// Creates a runtime that invokes `binary` (e.g. "docker" or "podman")
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            attached: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Checks that the runtime binary is installed and answering
    ///
    /// # Returns
    /// The version string reported by the binary
    pub async fn check_available(&self) -> Result<String, RuntimeError> {
        let version = self.output(&["--version"]).await?;
        info!("Container runtime is available: {}", version);
        Ok(version)
    }

    /// Runs the binary and returns its trimmed stdout
    async fn output(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!("Running {}", command);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stderr.is_empty() {
            debug!("{} stderr: {}", command, stderr);
        }

        if !output.status.success() {
            if is_not_found(&stderr) {
                return Err(RuntimeError::NotFound(stderr));
            }
            return Err(RuntimeError::CommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(stdout)
    }

    /// Starts a container through an attached client process
    ///
    /// The client's stdout and stderr are copied into `sink`. Returns once
    /// the runtime reports the container as no longer `created`.
    async fn start_attached(&self, id: &str, sink: OutputSink) -> Result<(), RuntimeError> {
        let command = format!("{} start --attach {}", self.binary, id);
        debug!("Running {}", command);

        let mut child = Command::new(&self.binary)
            .args(["start", "--attach", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let sink = Arc::new(tokio::sync::Mutex::new(sink));
        if let Some(stdout) = child.stdout.take() {
            self.track(id, tokio::spawn(pump(stdout, Arc::clone(&sink))));
        }
        if let Some(stderr) = child.stderr.take() {
            self.track(id, tokio::spawn(pump(stderr, sink)));
        }

        let deadline = Instant::now() + START_TIMEOUT;
        loop {
            let exited = child.try_wait().map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

            let status = self
                .output(&["container", "inspect", "--format", "{{.State.Status}}", id])
                .await?;
            if status != "created" {
                break;
            }

            if let Some(exit) = exited {
                return Err(RuntimeError::CommandFailed {
                    command,
                    code: exit.code().unwrap_or(-1),
                    stderr: "container did not start".to_string(),
                });
            }

            if Instant::now() >= deadline {
                return Err(RuntimeError::CommandFailed {
                    command,
                    code: -1,
                    stderr: "timed out waiting for the container to start".to_string(),
                });
            }

            tokio::time::sleep(START_POLL_INTERVAL).await;
        }

        // the client exits with the container
        self.track(
            id,
            tokio::spawn(async move {
                if let Err(e) = child.wait().await {
                    warn!("Attached client exited abnormally: {}", e);
                }
            }),
        );

        Ok(())
    }

    fn track(&self, id: &str, handle: JoinHandle<()>) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .push(handle);
    }

    /// Waits for a container's output to be fully copied into its sink
    async fn drain_streams(&self, id: &str) {
        let handles = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .unwrap_or_default();

        for mut handle in handles {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Output of container {} did not drain in time", id);
                handle.abort();
            }
        }
    }

    /// Drops whatever is still registered for a container
    fn forget(&self, id: &str) {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        let handles = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .unwrap_or_default();
        for handle in handles {
            handle.abort();
        }
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn inspect_image(&self, name: &str) -> Result<ImageInfo, RuntimeError> {
        let id = self
            .output(&["image", "inspect", "--format", "{{.Id}}", name])
            .await?;
        if id.is_empty() {
            return Err(RuntimeError::Parse(format!("no ID reported for image {}", name)));
        }
        Ok(ImageInfo { id })
    }

    async fn pull_image(&self, name: &str) -> Result<(), RuntimeError> {
        info!("Pulling image {}", name);
        self.output(&["pull", name]).await?;
        Ok(())
    }

    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<(), RuntimeError> {
        let dir = context_dir.to_string_lossy();
        self.output(&["build", "--quiet", "--tag", tag, &*dir])
            .await?;
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<(), RuntimeError> {
        self.output(&["rmi", id]).await?;
        Ok(())
    }

    async fn run_daemon(&self, image: &str, ports: &[String]) -> Result<String, RuntimeError> {
        let mut args = vec!["run", "--detach"];
        for port in ports {
            args.push("--publish");
            args.push(port);
        }
        args.push(image);

        let stdout = self.output(&args).await?;
        last_line(&stdout)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let stdout = self.output(&["container", "inspect", id]).await?;
        parse_container(&stdout)
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        let mut args: Vec<&str> = vec!["create"];
        if config.host.privileged {
            args.push("--privileged");
        }
        for link in &config.host.links {
            args.push("--link");
            args.push(link);
        }
        for bind in &config.host.binds {
            args.push("--volume");
            args.push(bind);
        }
        args.push(&config.image);

        let stdout = self.output(&args).await?;
        last_line(&stdout)
    }

    async fn attach(&self, id: &str, sink: OutputSink) -> Result<(), RuntimeError> {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), sink);
        debug!("Output of container {} will stream from its start", id);
        Ok(())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let sink = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        match sink {
            Some(sink) => self.start_attached(id, sink).await,
            None => {
                self.output(&["start", id]).await?;
                Ok(())
            }
        }
    }

    async fn wait_container(&self, id: &str) -> Result<i32, RuntimeError> {
        let waited = self.output(&["wait", id]).await;
        self.drain_streams(id).await;
        let stdout = waited?;
        let line = last_line(&stdout)?;
        line.parse::<i32>()
            .map_err(|_| RuntimeError::Parse(format!("invalid exit code {:?}", line)))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let seconds = grace.as_secs().to_string();
        self.output(&["stop", "--time", seconds.as_str(), id])
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.forget(id);
        self.output(&["rm", id]).await?;
        Ok(())
    }
}

/// Copies a client pipe into the shared sink until either side closes
async fn pump(mut reader: impl AsyncRead + Unpin, sink: Arc<tokio::sync::Mutex<OutputSink>>) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let mut sink = sink.lock().await;
        if sink.write_all(&buf[..n]).await.is_err() {
            break;
        }
        let _ = sink.flush().await;
    }
}

fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such") || stderr.contains("not known") || stderr.contains("not found")
}

fn last_line(stdout: &str) -> Result<String, RuntimeError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
        .ok_or_else(|| RuntimeError::Parse("expected an ID on stdout".to_string()))
}

#[derive(Debug, Deserialize)]
struct InspectedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: NetworkSettings,
    #[serde(rename = "Config", default)]
    config: InspectedConfig,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(rename = "Ports", default)]
    ports: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "Networks", default)]
    networks: Option<HashMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct InspectedConfig {
    #[serde(rename = "ExposedPorts", default)]
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
}

/// Parses `container inspect` output
fn parse_container(json: &str) -> Result<ContainerInfo, RuntimeError> {
    let inspected: Vec<InspectedContainer> =
        serde_json::from_str(json).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    let container = inspected
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::Parse("empty inspect result".to_string()))?;

    let settings = container.network_settings;

    let mut ip_address = settings.ip_address;
    if ip_address.is_empty() {
        // user-defined networks report their address per network
        let mut networks: Vec<_> = settings.networks.unwrap_or_default().into_iter().collect();
        networks.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some((_, endpoint)) = networks.into_iter().find(|(_, e)| !e.ip_address.is_empty()) {
            ip_address = endpoint.ip_address;
        }
    }

    let ports: BTreeSet<String> = settings
        .ports
        .unwrap_or_default()
        .into_keys()
        .chain(container.config.exposed_ports.unwrap_or_default().into_keys())
        .map(|key| match key.split_once('/') {
            Some((port, _)) => port.to_string(),
            None => key,
        })
        .collect();

    Ok(ContainerInfo {
        id: container.id,
        name: container.name.trim_start_matches('/').to_string(),
        ip_address,
        ports: ports.into_iter().collect(),
    })
}
