use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a supervised task ended after being told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Returned on its own within the grace period
    Clean,
    /// Panicked or was already aborted
    Crashed,
    /// Overran the grace period and was aborted
    Aborted,
}

/// A spawned worker or dispatcher task plus its private control channel.
///
/// The token is the only thing the engine uses to talk to the task after
/// spawning it; it carries nothing but the shutdown signal.
#[derive(Debug)]
pub struct Process {
    name: String,
    control: CancellationToken,
    handle: JoinHandle<()>,
}

impl Process {
    /// Spawn `body` with a fresh control token.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let control = CancellationToken::new();
        let handle = tokio::spawn(body(control.clone()));
        Self {
            name: name.into(),
            control,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal_shutdown(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit until `deadline`, aborting it after that.
    pub async fn join(mut self, deadline: Instant) -> ExitKind {
        match tokio::time::timeout_at(deadline, &mut self.handle).await {
            Ok(Ok(())) => {
                tracing::debug!(process = %self.name, "Process exited");
                ExitKind::Clean
            }
            Ok(Err(e)) => {
                tracing::error!(process = %self.name, error = %e, "Process crashed");
                ExitKind::Crashed
            }
            Err(_) => {
                tracing::warn!(process = %self.name, "Process overran shutdown grace period, aborting");
                self.handle.abort();
                ExitKind::Aborted
            }
        }
    }

    /// Stop without waiting.
    pub fn kill(&self) {
        self.control.cancel();
        self.handle.abort();
    }
}
