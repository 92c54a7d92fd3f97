//! Public entry point: owns the worker and dispatcher tasks and offers a
//! request/response facade over them.

pub mod backoff;
pub mod process;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, DispatcherMessage, SubmissionStatus, SubmissionTracker};
use crate::error::{Result, SwarmError};
use crate::protocol::{Call, Outcome};
use crate::transport::BroadcastQueue;
use crate::worker::{FunctionRegistry, Worker};

use self::backoff::random_retry_delay;
pub use self::process::{ExitKind, Process};

/// What `Engine::stop` observed while tearing down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub clean: usize,
    pub crashed: Vec<String>,
    pub aborted: Vec<String>,
    /// Handlers still running on blocking threads once every task was
    /// joined or aborted. They ignored cancellation and will finish on
    /// their own, but their outcomes are discarded.
    pub abandoned_calls: usize,
}

/// Owns one dispatcher and `worker_count` workers.
///
/// `submit` returns as soon as the call is announced. `result` queries the
/// worker pool for the outcome, because only the worker that ran a call
/// has it cached.
pub struct Engine {
    config: EngineConfig,
    queue: BroadcastQueue,
    dispatcher_tx: mpsc::Sender<DispatcherMessage>,
    tracker: Arc<RwLock<SubmissionTracker>>,
    workers: Vec<Worker>,
    processes: Vec<Process>,
}

impl Engine {
    /// Spawn the dispatcher and workers. Must be called inside a tokio
    /// runtime.
    pub fn start(config: EngineConfig, registry: FunctionRegistry) -> Result<Self> {
        config.validate()?;

        let queue = BroadcastQueue::new(config.queue_capacity);
        let (dispatcher, dispatcher_rx) = Dispatcher::new(config.dispatcher_config(), queue.clone());
        let dispatcher_tx = dispatcher.message_sender();
        let tracker = dispatcher.tracker();

        let mut workers = Vec::with_capacity(config.worker_count);
        let mut processes = Vec::with_capacity(config.worker_count + 1);
        processes.push(Process::spawn("dispatcher", move |token| async move {
            dispatcher.run(dispatcher_rx, token).await;
        }));

        for index in 0..config.worker_count {
            let worker = Worker::new(config.worker_config(index), queue.clone(), registry.clone());
            let name = format!("worker-{}", worker.id());
            workers.push(worker.clone());
            processes.push(Process::spawn(name, move |token| async move {
                worker.run(token).await;
            }));
        }

        tracing::info!(
            workers = config.worker_count,
            local = config.local,
            functions = ?registry.names(),
            "Engine started"
        );

        Ok(Self {
            config,
            queue,
            dispatcher_tx,
            tracker,
            workers,
            processes,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.processes.is_empty()
    }

    /// Announce `call` and return its id. Execution happens asynchronously.
    pub async fn submit(&self, call: Call) -> Result<String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(DispatcherMessage::Submit { call, response_tx })
            .await?;
        response_rx.await.map_err(|_| SwarmError::EngineStopped)?
    }

    pub async fn submission_status(&self, id: &str) -> Option<SubmissionStatus> {
        self.tracker.read().await.status(id)
    }

    /// Block until the submission leaves `Pending`.
    ///
    /// Returns `Completed`, or `Unfulfilled` as an error carrying the
    /// dispatcher's last failure reason.
    pub async fn wait_for_submission(&self, id: &str) -> Result<SubmissionStatus> {
        let mut rx = self
            .tracker
            .read()
            .await
            .subscribe(id)
            .ok_or_else(|| SwarmError::unfulfilled(id, "never submitted"))?;

        let status = *rx
            .wait_for(|status| *status != SubmissionStatus::Pending)
            .await
            .map_err(|_| SwarmError::EngineStopped)?;

        match status {
            SubmissionStatus::Unfulfilled => {
                let reason = self
                    .tracker
                    .read()
                    .await
                    .last_error(id)
                    .unwrap_or("unknown")
                    .to_string();
                Err(SwarmError::unfulfilled(id, reason))
            }
            status => Ok(status),
        }
    }

    /// Single RESULT lookup: whichever worker pulls the announcement answers.
    pub async fn lookup(&self, id: &str) -> Result<Outcome> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(DispatcherMessage::Lookup {
            id: id.to_string(),
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| SwarmError::EngineStopped)?
    }

    /// Query the pool up to `result_attempts` times for `id`'s outcome.
    ///
    /// The first answer other than `NotFound` wins, including an
    /// `Outcome::Error` from a failed call. Lookups nobody answered count as
    /// misses.
    pub async fn result(&self, id: &str) -> Result<Outcome> {
        let attempts = self.config.result_attempts;

        for attempt in 1..=attempts {
            match self.lookup(id).await {
                Ok(Outcome::NotFound { .. }) => {
                    tracing::debug!(id, attempt, "Result not cached on answering worker");
                }
                Ok(outcome) => {
                    tracing::debug!(id, attempt, "Result found");
                    return Ok(outcome);
                }
                Err(e @ (SwarmError::EngineStopped | SwarmError::InvalidConfig(_))) => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::debug!(id, attempt, error = %e, "Result lookup missed");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(random_retry_delay(
                    self.config.result_retry_min_ms,
                    self.config.result_retry_max_ms,
                ))
                .await;
            }
        }

        Err(SwarmError::ResultUnavailable {
            id: id.to_string(),
            attempts,
        })
    }

    /// Signal every task to stop, then join them. Tasks still running when
    /// the grace period ends are aborted.
    ///
    /// Running handlers see the stop through [`CallContext`](crate::CallContext).
    /// Those that do not return in time are counted in
    /// [`StopReport::abandoned_calls`].
    pub async fn stop(&mut self) -> StopReport {
        let mut report = StopReport::default();
        if self.processes.is_empty() {
            return report;
        }

        tracing::info!(processes = self.processes.len(), "Stopping engine");
        for process in &self.processes {
            process.signal_shutdown();
        }
        self.queue.close();

        let deadline = Instant::now() + self.config.shutdown_grace();
        for process in self.processes.drain(..) {
            let name = process.name().to_string();
            match process.join(deadline).await {
                ExitKind::Clean => report.clean += 1,
                ExitKind::Crashed => report.crashed.push(name),
                ExitKind::Aborted => report.aborted.push(name),
            }
        }
        report.abandoned_calls = self.workers.iter().map(Worker::running_calls).sum();
        if report.abandoned_calls > 0 {
            tracing::warn!(
                calls = report.abandoned_calls,
                "Handlers still running after shutdown grace period"
            );
        }

        tracing::info!(
            clean = report.clean,
            crashed = report.crashed.len(),
            aborted = report.aborted.len(),
            abandoned_calls = report.abandoned_calls,
            "Engine stopped"
        );
        report
    }

    async fn send(&self, message: DispatcherMessage) -> Result<()> {
        if !self.is_running() {
            return Err(SwarmError::EngineStopped);
        }
        self.dispatcher_tx
            .send(message)
            .await
            .map_err(|_| SwarmError::EngineStopped)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for process in &self.processes {
            process.kill();
        }
    }
}
