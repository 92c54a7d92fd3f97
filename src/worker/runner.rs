use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Result, SwarmError};
use crate::protocol::codec::decode_announcement;
use crate::protocol::{Announcement, AnnouncementKind, ControlSignal, Frame, Outcome};
use crate::transport::{BroadcastQueue, RendezvousStream};
use crate::worker::cache::ResultCache;
use crate::worker::executor::CallExecutor;
use crate::worker::registry::FunctionRegistry;

/// A long-lived puller of broadcast announcements.
///
/// The worker only pulls when it has a free execution slot, so a busy
/// worker leaves announcements for idle ones. Each pulled announcement is
/// handled on its own task; the poll loop itself only waits on the queue
/// and the control token.
#[derive(Debug, Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
    queue: BroadcastQueue,
    executor: CallExecutor,
    cache: ResultCache,
    slots: Arc<Semaphore>,
}

impl Worker {
    pub fn new(config: WorkerConfig, queue: BroadcastQueue, registry: FunctionRegistry) -> Self {
        let cache = ResultCache::new(config.cache_ttl, config.cache_capacity);
        let slots = Arc::new(Semaphore::new(config.execution_slots));
        Self {
            config: Arc::new(config),
            queue,
            executor: CallExecutor::new(registry),
            cache,
            slots,
        }
    }

    pub fn id(&self) -> u64 {
        self.config.worker_id
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Calls still running on blocking threads, including ones whose
    /// rendezvous task has already been aborted.
    pub fn running_calls(&self) -> usize {
        self.executor.running()
    }

    /// Poll loop. Returns once `token` is cancelled (or the queue closes)
    /// and every in-flight announcement has been handled. Cached outcomes
    /// are dropped on exit.
    pub async fn run(&self, token: CancellationToken) {
        let worker_id = self.id();
        tracing::info!(
            worker_id,
            tags = ?self.config.tags,
            local = self.config.local,
            "Worker started"
        );

        let mut in_flight = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(worker_id, error = %e, "Announcement task failed");
                }
            }

            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let message = tokio::select! {
                _ = token.cancelled() => break,
                message = self.queue.pull(self.config.poll_interval) => message,
            };

            let Some(bytes) = message else {
                if self.queue.is_closed() {
                    break;
                }
                continue;
            };

            let announcement = match decode_announcement(&bytes) {
                Ok(announcement) => announcement,
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "Dropping malformed announcement");
                    continue;
                }
            };

            let worker = self.clone();
            let task_token = token.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                worker.handle(announcement, task_token).await;
            });
        }

        tracing::info!(worker_id, in_flight = in_flight.len(), "Worker draining");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(worker_id, error = %e, "Announcement task failed");
            }
        }
        self.cache.clear();
        tracing::info!(worker_id, "Worker stopped");
    }

    /// Handle a single announcement end to end. Errors are logged, never
    /// returned: one bad rendezvous must not affect the next.
    pub async fn handle(&self, announcement: Announcement, token: CancellationToken) {
        let worker_id = self.id();
        let id = announcement.id.clone();
        let port = announcement.rendezvous_port;
        tracing::debug!(worker_id, id = %id, kind = %announcement.kind, port, "Received announcement");

        let result = match announcement.kind {
            AnnouncementKind::Run => self.handle_run(&announcement, &token).await,
            AnnouncementKind::Result => self.handle_result(&announcement).await,
        };

        match result {
            Ok(()) => {}
            Err(SwarmError::Io(e)) => {
                // Usually a stale announcement whose rendezvous already closed.
                tracing::debug!(worker_id, id = %id, port, error = %e, "Rendezvous unavailable");
            }
            Err(e) => {
                tracing::warn!(worker_id, id = %id, port, error = %e, "Rendezvous failed");
            }
        }
    }

    async fn connect(&self, port: u16) -> Result<RendezvousStream> {
        RendezvousStream::connect(self.config.rendezvous_host, port, self.config.io_timeout).await
    }

    async fn handle_run(&self, announcement: &Announcement, token: &CancellationToken) -> Result<()> {
        let worker_id = self.id();
        let mut stream = self.connect(announcement.rendezvous_port).await?;

        if !self.config.accepts(&announcement.tags) {
            tracing::debug!(
                worker_id,
                id = %announcement.id,
                required = ?announcement.tags,
                "Declining job without matching tags"
            );
            return stream
                .send(&Frame::Control(ControlSignal::NotMatched))
                .await;
        }

        stream.send(&Frame::Control(ControlSignal::Hello)).await?;

        let frame = tokio::select! {
            _ = token.cancelled() => {
                stream.send(&Frame::Control(ControlSignal::ShuttingDown)).await?;
                return Ok(());
            }
            frame = stream.recv_timeout(self.config.io_timeout) => frame?,
        };

        let call = match frame {
            Frame::Call(call) => call,
            other => {
                return Err(SwarmError::protocol(
                    format!("expected call, got {}", other.describe()),
                    Vec::new(),
                ))
            }
        };

        let id = call.id();
        if id != announcement.id {
            return Err(SwarmError::protocol(
                format!("call hashes to {id}, announced as {}", announcement.id),
                Vec::new(),
            ));
        }

        let outcome = match self.cache.get(&id) {
            Some(entry) => {
                tracing::debug!(worker_id, id = %id, "Serving run from cache");
                entry.outcome
            }
            None => {
                let outcome = self.executor.execute(&id, &call, token).await;
                self.cache.insert(&id, outcome.clone());
                outcome
            }
        };

        stream.send(&Frame::Outcome(outcome)).await?;
        self.expect_ack(&mut stream).await?;
        tracing::debug!(worker_id, id = %id, "Run rendezvous complete");
        Ok(())
    }

    async fn handle_result(&self, announcement: &Announcement) -> Result<()> {
        let outcome = match self.cache.get(&announcement.id) {
            Some(entry) => entry.outcome,
            None => Outcome::NotFound {
                id: announcement.id.clone(),
            },
        };
        tracing::debug!(
            worker_id = self.id(),
            id = %announcement.id,
            hit = !outcome.is_not_found(),
            "Answering result lookup"
        );

        let mut stream = self.connect(announcement.rendezvous_port).await?;
        stream
            .send(&Frame::Answer {
                id: announcement.id.clone(),
                outcome,
            })
            .await?;
        self.expect_ack(&mut stream).await
    }

    async fn expect_ack(&self, stream: &mut RendezvousStream) -> Result<()> {
        match stream.recv_timeout(self.config.io_timeout).await? {
            Frame::Control(ControlSignal::PayloadSent) => Ok(()),
            other => Err(SwarmError::protocol(
                format!("expected PAYLOAD_SENT, got {}", other.describe()),
                Vec::new(),
            )),
        }
    }
}
