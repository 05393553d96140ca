//! Build lifecycle
//!
//! A `Builder` owns one build from start to finish:
//! - Setup: assemble the build context, start service containers, build the image
//! - Run: create and start the build container, racing it against the time limit
//! - Teardown: stop and remove every container and image setup created
//!
//! Teardown runs on every path out of setup and run, and never fails: each
//! step is best effort and problems are only logged.

use keel_core::domain::build::{EXIT_FAILURE, EXIT_TIMEOUT};
use keel_core::domain::{BuildRequest, BuildScript, BuildState, Repo};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::{self, buildfile, dockerfile, proxy};
use crate::cache::{self, CacheMount};
use crate::error::{BuildError, Result};
use crate::registry::ImageRegistry;
use crate::runtime::{
    ContainerConfig, ContainerInfo, ContainerRuntime, HostConfig, ImageInfo, OutputSink,
};

/// Grace period given to containers before they are killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(15);

/// Grace period for a service container that failed to start cleanly
const UNTRACKED_STOP_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle phase of a builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Setup,
    Running,
    SetupFailed,
    RunFailed,
    TimedOut,
    Completed,
    TornDown,
}

/// The build container's execution task
///
/// The task runs independently of the deadline. Whatever the outcome of
/// the race, teardown learns the container from `launched` once the task
/// has finished creating and starting it.
struct Execution {
    /// Container ID, sent once create, attach and start have been attempted
    launched: oneshot::Receiver<String>,

    /// Still running after a timeout; reaped by teardown
    handle: Option<JoinHandle<Result<i32>>>,
}

/// Executes one build
pub struct Builder {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ImageRegistry>,

    build: BuildScript,
    repo: Repo,

    /// Identity file copied into the container's SSH directory
    key: Vec<u8>,

    /// Time limit, `None` waits for the container however long it runs
    timeout: Option<Duration>,

    /// Destination of the container's output; discarded when unset
    stdout: Mutex<Option<OutputSink>>,

    cache_root: PathBuf,
    stop_grace: Duration,

    phase: Phase,
    build_state: Option<BuildState>,

    /// Image built for this build
    image: Option<ImageInfo>,

    /// Service containers, in start order
    services: Vec<ContainerInfo>,
}

impl Builder {
    /// Creates a builder for a request
    ///
    /// The request's timeout applies; cache volumes live under the root
    /// resolved from the environment.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<ImageRegistry>,
        request: BuildRequest,
    ) -> Self {
        Self {
            runtime,
            registry,
            build: request.build,
            repo: request.repo,
            key: request.key,
            timeout: request.timeout,
            stdout: Mutex::new(None),
            cache_root: cache::resolve_root(),
            stop_grace: DEFAULT_STOP_GRACE,
            phase: Phase::Created,
            build_state: None,
            image: None,
            services: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.stdout = Mutex::new(Some(sink));
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Final state of the build, available once `run` returns
    pub fn build_state(&self) -> Option<&BuildState> {
        self.build_state.as_ref()
    }

    /// Runs the build to completion
    ///
    /// Exceeding the time limit is not an error: the returned state carries
    /// exit code 124. Whatever the outcome, every container and image
    /// created along the way is removed before this returns, and a build
    /// state is recorded.
    pub async fn run(&mut self) -> Result<BuildState> {
        if self.phase != Phase::Created {
            return Err(BuildError::AlreadyRun);
        }

        let mut execution = None;
        let result = self.run_phases(&mut execution).await;
        self.teardown(execution).await;
        result
    }

    async fn run_phases(&mut self, execution: &mut Option<Execution>) -> Result<BuildState> {
        self.phase = Phase::Setup;
        let image_id = match self.setup().await {
            Ok(image_id) => image_id,
            Err(e) => {
                error!("Setup failed for build {}: {}", self.name(), e);
                return Err(self.fail(BuildState::started_now(), Phase::SetupFailed, e));
            }
        };

        self.phase = Phase::Running;
        let mut state = BuildState::started_now();
        self.build_state = Some(state);

        let config = match self.container_config(image_id).await {
            Ok(config) => config,
            Err(e) => {
                error!("Build {} failed to run: {}", self.name(), e);
                return Err(self.fail(state, Phase::RunFailed, e));
            }
        };

        // attached before start so no output is lost
        let sink = self
            .stdout
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .unwrap_or_else(|| Box::new(tokio::io::sink()));

        info!("Starting build {}", self.name());
        let (notify, launched) = oneshot::channel();
        let mut handle = tokio::spawn(execute(self.runtime.clone(), config, sink, notify));

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // on timeout the task keeps going; teardown stops its container
        let outcome = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = deadline => None,
        };

        let result = match outcome {
            Some(joined) => {
                *execution = Some(Execution {
                    launched,
                    handle: None,
                });
                joined.unwrap_or_else(|e| Err(BuildError::Execution(e.to_string())))
            }
            None => {
                *execution = Some(Execution {
                    launched,
                    handle: Some(handle),
                });
                state.finish(EXIT_TIMEOUT);
                self.build_state = Some(state);
                self.phase = Phase::TimedOut;
                error!("Time limit exceeded for build {}", self.name());
                return Ok(state);
            }
        };

        match result {
            Ok(exit_code) => {
                state.finish(exit_code);
                self.build_state = Some(state);
                self.phase = Phase::Completed;
                info!(
                    "Build {} finished with exit code {}",
                    self.name(),
                    exit_code
                );
                Ok(state)
            }
            Err(e) => {
                error!("Build {} failed to run: {}", self.name(), e);
                Err(self.fail(state, Phase::RunFailed, e))
            }
        }
    }

    /// Records a failed build and hands back its error
    fn fail(&mut self, mut state: BuildState, phase: Phase, e: BuildError) -> BuildError {
        state.finish(EXIT_FAILURE);
        self.build_state = Some(state);
        self.phase = phase;
        e
    }

    /// Prepares the build image and starts the service containers
    ///
    /// # Returns
    /// ID of the built image
    async fn setup(&mut self) -> Result<String> {
        // removed when it goes out of scope, on every path out of setup
        let context = tempfile::Builder::new()
            .prefix("keel-")
            .tempdir()
            .map_err(|e| BuildError::io("failed to create build context directory", e))?;
        let dir = context.path();

        if self.build.image.is_empty() {
            error!("No build image specified for build {}", self.name());
            return Err(BuildError::MissingImage);
        }

        let image = self.registry.resolve_builder(&self.build.image).to_string();
        if image != self.build.image {
            debug!("Builder alias {} resolves to {}", self.build.image, image);
            self.build.image = image;
        }

        if self.repo.is_local() {
            info!("Copying repository {} into the build context", self.repo.path);
            let (src, dst) = (PathBuf::from(&self.repo.path), dir.join(artifacts::SOURCE_DIR));
            tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
                .await
                .map_err(|e| BuildError::io("repository copy was interrupted", std::io::Error::other(e)))?
                .map_err(|e| BuildError::io(format!("failed to copy repository {}", self.repo.path), e))?;
        }

        self.start_services().await?;

        let script = buildfile::generate(&self.build, &self.repo);
        let proxy = proxy::generate(&self.services);
        let official = self.registry.is_official(&self.build.image);
        let definition = dockerfile::generate(&self.build.image, &self.repo, official);

        write_file(&dir.join(artifacts::IDENTITY_FILE), &self.key, 0o600).await?;
        write_file(&dir.join(artifacts::BUILD_SCRIPT), script.as_bytes(), 0o700).await?;
        write_file(&dir.join(artifacts::PROXY_SCRIPT), proxy.to_script().as_bytes(), 0o755).await?;
        write_file(&dir.join(artifacts::IMAGE_DEFINITION), definition.as_bytes(), 0o644).await?;

        info!("Creating build image from {}", self.build.image);

        match self.runtime.inspect_image(&self.build.image).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => self.runtime.pull_image(&self.build.image).await?,
            Err(e) => warn!("Could not inspect image {}: {}", self.build.image, e),
        }

        let tag = format!("keel-{}", Uuid::new_v4().simple());
        self.runtime.build_image(&tag, dir).await?;

        let image_id = match self.runtime.inspect_image(&tag).await {
            Ok(image) => {
                let id = image.id.clone();
                self.image = Some(image);
                id
            }
            Err(e) => {
                if let Err(rm) = self.runtime.remove_image(&tag).await {
                    warn!("Failed to remove image {}: {}", tag, rm);
                }
                return Err(e.into());
            }
        };

        if let Err(e) = context.close() {
            warn!("Failed to remove build context directory: {}", e);
        }

        Ok(image_id)
    }

    /// Starts each declared service, in declaration order
    async fn start_services(&mut self) -> Result<()> {
        for declaration in &self.build.services {
            let image = self.registry.resolve_service(declaration)?;

            info!("Starting service container {}", declaration);
            let id = self.runtime.run_daemon(&image.tag, &image.ports).await?;

            match self.runtime.inspect_container(&id).await {
                Ok(info) => self.services.push(info),
                Err(e) => {
                    // not tracked yet, so teardown would never see it
                    self.discard_container(&id, UNTRACKED_STOP_GRACE).await;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Builds the runtime configuration of the build container
    async fn container_config(&self, image_id: String) -> Result<ContainerConfig> {
        let mut host = HostConfig {
            privileged: false,
            ..Default::default()
        };

        for (service, declaration) in self.services.iter().zip(&self.build.services) {
            let image = self.registry.resolve_service(declaration)?;
            host.links.push(format!("{}:{}", service.name, image.name));
        }

        if !self.build.cache.is_empty() {
            info!("Cache root is {}", self.cache_root.display());
            tokio::fs::create_dir_all(&self.cache_root)
                .await
                .map_err(|e| {
                    BuildError::io(
                        format!("failed to create cache root {}", self.cache_root.display()),
                        e,
                    )
                })?;
        }

        for volume in &self.build.cache {
            let mount = CacheMount::new(&self.cache_root, &self.repo, volume);
            if tokio::fs::metadata(&mount.host).await.is_err() {
                tokio::fs::create_dir_all(&mount.host).await.map_err(|e| {
                    BuildError::io(
                        format!("failed to create cache volume {}", mount.host.display()),
                        e,
                    )
                })?;
            }
            info!("Mounting volume {}", mount.bind());
            host.binds.push(mount.bind());
        }

        Ok(ContainerConfig {
            image: image_id,
            host,
        })
    }

    /// Stops and removes the build container, services and image
    async fn teardown(&mut self, execution: Option<Execution>) {
        if let Some(execution) = execution {
            // after a timeout this waits out a create or start still in flight
            match execution.launched.await {
                Ok(id) => {
                    info!("Removing build container {}", id);
                    self.discard_container(&id, self.stop_grace).await;
                }
                Err(_) => debug!("No build container was created"),
            }

            if let Some(handle) = execution.handle {
                handle.abort();
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        warn!("Build execution panicked: {}", e);
                    }
                }
            }
        }

        let services = std::mem::take(&mut self.services);
        for (i, service) in services.iter().enumerate() {
            let declaration = self.build.services.get(i).map(String::as_str).unwrap_or("");
            info!("Removing service container {} ({})", declaration, service.id);
            self.discard_container(&service.id, self.stop_grace).await;
        }

        if let Some(image) = self.image.take() {
            info!("Removing build image {}", image.id);
            if let Err(e) = self.runtime.remove_image(&image.id).await {
                error!("Failed to completely delete build image {}: {}", image.id, e);
            }
        }

        self.phase = Phase::TornDown;
    }

    /// Best effort stop and remove of one container
    async fn discard_container(&self, id: &str, grace: Duration) {
        if let Err(e) = self.runtime.stop_container(id, grace).await {
            warn!("Failed to stop container {}: {}", id, e);
        }
        if let Err(e) = self.runtime.remove_container(id).await {
            error!("Failed to delete container {}: {}", id, e);
        }
    }

    fn name(&self) -> &str {
        if self.build.name.is_empty() {
            &self.repo.name
        } else {
            &self.build.name
        }
    }
}

/// Creates, starts and waits for the build container
///
/// `launched` receives the container ID once attach and start have been
/// attempted, whether or not they succeeded.
///
/// # Returns
/// The container's exit code
async fn execute(
    runtime: Arc<dyn ContainerRuntime>,
    config: ContainerConfig,
    sink: OutputSink,
    launched: oneshot::Sender<String>,
) -> Result<i32> {
    let id = runtime.create_container(&config).await?;

    let started = launch(runtime.as_ref(), &id, sink).await;
    let _ = launched.send(id.clone());
    started?;

    let exit_code = runtime.wait_container(&id).await?;
    Ok(exit_code)
}

/// Attaches the output sink, then starts the container
async fn launch(runtime: &dyn ContainerRuntime, id: &str, sink: OutputSink) -> Result<()> {
    runtime.attach(id, sink).await?;
    runtime.start_container(id).await?;
    Ok(())
}

/// Writes a build context file with exact permissions
async fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let describe = |e| BuildError::io(format!("failed to write {}", path.display()), e);
    tokio::fs::write(path, contents).await.map_err(describe)?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(describe)
}

/// Copies a directory tree, preserving permissions and symlinks
///
/// Build contexts cannot follow links that leave the context, so the
/// repository is copied rather than linked.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    // applied last so a read-only directory can still be filled
    std::fs::set_permissions(dst, std::fs::metadata(src)?.permissions())
}
