//! Worker pool
//!
//! A fixed set of workers drains a FIFO queue of build tasks. Each task runs
//! in its own spawned task so a panicking build does not take its worker
//! down with it.

use keel_core::domain::build::EXIT_FAILURE;
use keel_core::domain::{BuildReport, BuildRequest, BuildState, BuildStatus};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PoolError;
use crate::runtime::OutputSink;
use crate::service::{BuildReporter, BuildRunner};

/// A queued build
pub struct BuildTask {
    pub id: Uuid,
    pub request: BuildRequest,

    /// Live output of the build container
    pub output: OutputSink,

    /// Receives the task's lifecycle events
    pub reporter: Arc<dyn BuildReporter>,
}

impl BuildTask {
    pub fn new(
        request: BuildRequest,
        output: OutputSink,
        reporter: Arc<dyn BuildReporter>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            output,
            reporter,
        }
    }
}

type Queue = Arc<Mutex<mpsc::UnboundedReceiver<BuildTask>>>;

/// Bounded-concurrency executor of builds
pub struct WorkerPool {
    sender: Option<mpsc::UnboundedSender<BuildTask>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Launches `concurrency` workers sharing one runner
    ///
    /// A concurrency of zero is treated as one.
    pub fn start(concurrency: usize, runner: Arc<dyn BuildRunner>) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: Queue = Arc::new(Mutex::new(receiver));

        info!("Starting worker pool with {} worker(s)", concurrency);

        let workers = (0..concurrency)
            .map(|n| tokio::spawn(Self::worker(n, Arc::clone(&queue), Arc::clone(&runner))))
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queues a task without waiting for a worker
    pub fn enqueue(&self, task: BuildTask) -> Result<(), PoolError> {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        debug!("Queueing build {}", task.id);
        sender.send(task).map_err(|_| PoolError::Closed)
    }

    /// Stops accepting tasks and waits for the queued ones to finish
    pub async fn shutdown(&mut self) {
        // workers exit once the queue is closed and empty
        self.sender.take();

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker panicked: {}", e);
            }
        }
        info!("Worker pool stopped");
    }

    async fn worker(n: usize, queue: Queue, runner: Arc<dyn BuildRunner>) {
        debug!("Worker {} ready", n);

        loop {
            // the lock is released as soon as a task is received
            let task = queue.lock().await.recv().await;
            let Some(task) = task else {
                break;
            };

            let id = task.id;
            let reporter = Arc::clone(&task.reporter);
            let handle = tokio::spawn(Self::execute(task, Arc::clone(&runner)));

            if let Err(e) = handle.await {
                error!("Build {} panicked: {}", id, e);
                reporter
                    .finished(BuildReport {
                        id,
                        status: BuildStatus::Error,
                        state: failed_state(),
                        error: Some(format!("build panicked: {}", e)),
                    })
                    .await;
            }
        }

        debug!("Worker {} exiting", n);
    }

    async fn execute(task: BuildTask, runner: Arc<dyn BuildRunner>) {
        let BuildTask {
            id,
            request,
            output,
            reporter,
        } = task;

        info!("Starting build {} for {}", id, request.repo.name);
        reporter.started(id).await;

        let report = match runner.run(request, output).await {
            Ok(state) => BuildReport {
                id,
                status: BuildStatus::from_exit_code(state.exit_code),
                state,
                error: None,
            },
            Err(e) => {
                error!("Build {} failed: {}", id, e);
                BuildReport {
                    id,
                    status: BuildStatus::Error,
                    state: failed_state(),
                    error: Some(e.to_string()),
                }
            }
        };

        reporter.finished(report).await;
    }
}

fn failed_state() -> BuildState {
    let mut state = BuildState::started_now();
    state.finish(EXIT_FAILURE);
    state
}
