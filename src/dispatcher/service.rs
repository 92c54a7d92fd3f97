use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dispatcher::submission::SubmissionTracker;
use crate::error::{Result, SwarmError};
use crate::protocol::codec::encode_announcement;
use crate::protocol::{Announcement, Call, ControlSignal, Frame, Outcome};
use crate::transport::{BroadcastQueue, RendezvousListener, RendezvousStream};

/// Requests the engine sends to the dispatcher
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Announce a RUN and drive its rendezvous in the background
    Submit {
        call: Call,
        response_tx: oneshot::Sender<Result<String>>,
    },
    /// Announce a RESULT lookup and report whatever the answering worker says
    Lookup {
        id: String,
        response_tx: oneshot::Sender<Result<Outcome>>,
    },
}

/// How a single RUN rendezvous connection ended.
#[derive(Debug, PartialEq, Eq)]
enum RunHandshake {
    Completed,
    Declined(ControlSignal),
}

/// Bridges engine requests to the broadcast queue and serves the
/// rendezvous side of every announcement it makes.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: BroadcastQueue,
    tracker: Arc<RwLock<SubmissionTracker>>,
    message_tx: mpsc::Sender<DispatcherMessage>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: BroadcastQueue,
    ) -> (Self, mpsc::Receiver<DispatcherMessage>) {
        let (message_tx, message_rx) = mpsc::channel(config.inbox_capacity);

        let dispatcher = Self {
            config,
            queue,
            tracker: Arc::new(RwLock::new(SubmissionTracker::new())),
            message_tx,
        };

        (dispatcher, message_rx)
    }

    pub fn message_sender(&self) -> mpsc::Sender<DispatcherMessage> {
        self.message_tx.clone()
    }

    pub fn tracker(&self) -> Arc<RwLock<SubmissionTracker>> {
        self.tracker.clone()
    }

    /// Main loop. On cancellation, rendezvous still waiting for a worker
    /// are abandoned and their submissions marked unfulfilled.
    pub async fn run(
        &self,
        mut message_rx: mpsc::Receiver<DispatcherMessage>,
        token: CancellationToken,
    ) {
        tracing::info!(host = %self.config.rendezvous_host, "Dispatcher started");
        let mut rendezvous = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                Some(joined) = rendezvous.join_next(), if !rendezvous.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Rendezvous task failed");
                    }
                }

                msg = message_rx.recv() => {
                    match msg {
                        Some(DispatcherMessage::Submit { call, response_tx }) => {
                            let result = self.submit(call, &mut rendezvous).await;
                            let _ = response_tx.send(result);
                        }
                        Some(DispatcherMessage::Lookup { id, response_tx }) => {
                            self.lookup(id, response_tx, &mut rendezvous).await;
                        }
                        None => break,
                    }
                }
            }
        }

        rendezvous.shutdown().await;
        let abandoned = self
            .tracker
            .write()
            .await
            .fail_all_pending("dispatcher shut down");
        tracing::info!(abandoned, "Dispatcher stopped");
    }

    /// Announce a RUN for `call`. Returns the call id as soon as the
    /// announcement is queued; the rendezvous runs on `rendezvous`.
    async fn submit(&self, call: Call, rendezvous: &mut JoinSet<()>) -> Result<String> {
        let id = call.id();
        let listener = RendezvousListener::bind(self.config.rendezvous_host).await?;
        let announcement = Announcement::run(&call, listener.port());
        let bytes = encode_announcement(&announcement)?;

        self.queue.push(bytes.clone())?;
        {
            let mut tracker = self.tracker.write().await;
            let pruned = tracker.prune_finished(self.config.submission_retention);
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned finished submissions");
            }
            tracker.begin(&id);
        }
        tracing::info!(
            id = %id,
            name = call.name(),
            port = listener.port(),
            tags = ?call.tags(),
            "Announced run"
        );

        let task = RunRendezvous {
            id: id.clone(),
            call,
            listener,
            announcement: bytes,
            config: self.config.clone(),
            queue: self.queue.clone(),
            tracker: self.tracker.clone(),
        };
        rendezvous.spawn(task.drive());

        Ok(id)
    }

    async fn lookup(
        &self,
        id: String,
        response_tx: oneshot::Sender<Result<Outcome>>,
        rendezvous: &mut JoinSet<()>,
    ) {
        let prepared = async {
            let listener = RendezvousListener::bind(self.config.rendezvous_host).await?;
            let announcement = Announcement::result(id.clone(), listener.port());
            self.queue.push(encode_announcement(&announcement)?)?;
            Ok::<_, SwarmError>(listener)
        }
        .await;

        let listener = match prepared {
            Ok(listener) => listener,
            Err(e) => {
                let _ = response_tx.send(Err(e));
                return;
            }
        };

        tracing::debug!(id = %id, port = listener.port(), "Announced result lookup");
        let timeout = self.config.rendezvous_timeout;
        rendezvous.spawn(async move {
            let result = serve_lookup(&id, &listener, timeout).await;
            let _ = response_tx.send(result);
        });
    }
}

/// Background state for one RUN announcement.
struct RunRendezvous {
    id: String,
    call: Call,
    listener: RendezvousListener,
    announcement: Bytes,
    config: DispatcherConfig,
    queue: BroadcastQueue,
    tracker: Arc<RwLock<SubmissionTracker>>,
}

impl RunRendezvous {
    /// Serve connections until a worker completes the handshake.
    ///
    /// A decline (`NOT_MATCHED`, `SHUTTING_DOWN`) or a broken handshake
    /// means the announcement was consumed without being run, so it is
    /// pushed again on the same port, up to `max_dispatch_attempts` total
    /// broadcasts. A timeout with nobody connecting ends the submission.
    async fn drive(self) {
        let max_attempts = self.config.max_dispatch_attempts;
        let timeout = self.config.rendezvous_timeout;
        let mut attempts = 1u32;

        let result: std::result::Result<(), String> = loop {
            let mut stream = match self.listener.accept(timeout).await {
                Ok(Some(stream)) => stream,
                Ok(None) => break Err(format!("no worker connected within {timeout:?}")),
                Err(e) => break Err(format!("accept failed: {e}")),
            };

            match serve_run(&mut stream, &self.call, timeout).await {
                Ok(RunHandshake::Completed) => break Ok(()),
                Ok(RunHandshake::Declined(signal)) => {
                    tracing::debug!(id = %self.id, peer = %stream.peer(), ?signal, attempts, "Worker declined run");
                }
                Err(e) => {
                    tracing::warn!(id = %self.id, error = %e, attempts, "Run handshake failed");
                }
            }

            if attempts >= max_attempts {
                break Err(format!("no worker accepted after {attempts} broadcasts"));
            }
            attempts += 1;
            if let Err(e) = self.queue.push(self.announcement.clone()) {
                break Err(format!("re-broadcast failed: {e}"));
            }
        };

        let mut tracker = self.tracker.write().await;
        match result {
            Ok(()) => {
                tracker.complete(&self.id);
                tracing::info!(id = %self.id, attempts, "Run fulfilled");
            }
            Err(reason) => {
                tracing::warn!(id = %self.id, reason = %reason, "Run unfulfilled");
                tracker.fail(&self.id, reason);
            }
        }
    }
}

/// Dispatcher half of the RUN handshake:
/// `HELLO` → call → outcome → `PAYLOAD_SENT`.
async fn serve_run(
    stream: &mut RendezvousStream,
    call: &Call,
    timeout: std::time::Duration,
) -> Result<RunHandshake> {
    match stream.recv_timeout(timeout).await? {
        Frame::Control(ControlSignal::Hello) => {}
        Frame::Control(signal @ (ControlSignal::NotMatched | ControlSignal::ShuttingDown)) => {
            return Ok(RunHandshake::Declined(signal));
        }
        other => {
            return Err(SwarmError::protocol(
                format!("expected HELLO, got {}", other.describe()),
                Vec::new(),
            ))
        }
    }

    stream.send(&Frame::Call(call.clone())).await?;

    // Execution time is unbounded; a worker dying mid-call closes the socket.
    match stream.recv().await? {
        Frame::Outcome(outcome) => {
            stream
                .send(&Frame::Control(ControlSignal::PayloadSent))
                .await?;
            tracing::debug!(peer = %stream.peer(), ?outcome, "Received run outcome");
            Ok(RunHandshake::Completed)
        }
        Frame::Control(ControlSignal::ShuttingDown) => {
            Ok(RunHandshake::Declined(ControlSignal::ShuttingDown))
        }
        other => Err(SwarmError::protocol(
            format!("expected outcome, got {}", other.describe()),
            Vec::new(),
        )),
    }
}

/// Dispatcher half of the RESULT handshake: answer → `PAYLOAD_SENT`.
///
/// A stale announcement can name a port the OS has since handed to another
/// lookup, so an answer for any other id is rejected rather than returned.
async fn serve_lookup(
    id: &str,
    listener: &RendezvousListener,
    timeout: std::time::Duration,
) -> Result<Outcome> {
    let Some(mut stream) = listener.accept(timeout).await? else {
        return Err(SwarmError::unfulfilled(
            id,
            format!("no worker answered lookup within {timeout:?}"),
        ));
    };

    match stream.recv_timeout(timeout).await? {
        Frame::Answer {
            id: answered,
            outcome,
        } if answered == id => {
            stream
                .send(&Frame::Control(ControlSignal::PayloadSent))
                .await?;
            Ok(outcome)
        }
        Frame::Answer { id: answered, .. } => Err(SwarmError::protocol(
            format!("lookup for {id} answered for {answered}"),
            Vec::new(),
        )),
        other => Err(SwarmError::protocol(
            format!("expected answer, got {}", other.describe()),
            Vec::new(),
        )),
    }
}
