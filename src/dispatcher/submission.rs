use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Announced, waiting for a matching worker to finish the rendezvous
    Pending,
    /// A worker returned an outcome (which may itself be an execution error)
    Completed,
    /// No worker completed the rendezvous within the attempt/timeout budget
    Unfulfilled,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "pending"),
            SubmissionStatus::Completed => write!(f, "completed"),
            SubmissionStatus::Unfulfilled => write!(f, "unfulfilled"),
        }
    }
}

#[derive(Debug)]
struct Submission {
    status: watch::Sender<SubmissionStatus>,
    in_flight: usize,
    last_error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

/// Status of every submission this dispatcher has announced, by call id.
///
/// Identical calls share an id, so several RUN rendezvous may be in flight
/// for one entry. Any of them completing marks it `Completed`; it only
/// becomes `Unfulfilled` once all of them have failed.
#[derive(Debug, Default)]
pub struct SubmissionTracker {
    submissions: HashMap<String, Submission>,
}

impl SubmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new RUN rendezvous for `id`.
    pub fn begin(&mut self, id: &str) {
        match self.submissions.get_mut(id) {
            Some(sub) => {
                sub.in_flight += 1;
                if *sub.status.borrow() != SubmissionStatus::Pending {
                    sub.last_error = None;
                    sub.finished_at = None;
                    sub.status.send_replace(SubmissionStatus::Pending);
                }
            }
            None => {
                let (status, _) = watch::channel(SubmissionStatus::Pending);
                self.submissions.insert(
                    id.to_string(),
                    Submission {
                        status,
                        in_flight: 1,
                        last_error: None,
                        finished_at: None,
                    },
                );
            }
        }
    }

    pub fn complete(&mut self, id: &str) {
        if let Some(sub) = self.submissions.get_mut(id) {
            sub.in_flight = sub.in_flight.saturating_sub(1);
            sub.last_error = None;
            sub.finished_at = Some(Utc::now());
            sub.status.send_replace(SubmissionStatus::Completed);
        }
    }

    /// Record a failed rendezvous. Returns true if this left the
    /// submission `Unfulfilled`.
    pub fn fail(&mut self, id: &str, reason: impl Into<String>) -> bool {
        let Some(sub) = self.submissions.get_mut(id) else {
            return false;
        };
        sub.in_flight = sub.in_flight.saturating_sub(1);
        sub.last_error = Some(reason.into());
        if sub.in_flight == 0 && *sub.status.borrow() == SubmissionStatus::Pending {
            sub.finished_at = Some(Utc::now());
            sub.status.send_replace(SubmissionStatus::Unfulfilled);
            return true;
        }
        false
    }

    /// Fail every rendezvous still in flight, e.g. on shutdown.
    pub fn fail_all_pending(&mut self, reason: &str) -> usize {
        let pending: Vec<String> = self
            .submissions
            .iter()
            .filter(|(_, sub)| *sub.status.borrow() == SubmissionStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &pending {
            if let Some(sub) = self.submissions.get_mut(id) {
                sub.in_flight = 1;
            }
            self.fail(id, reason);
        }
        pending.len()
    }

    pub fn status(&self, id: &str) -> Option<SubmissionStatus> {
        self.submissions.get(id).map(|sub| *sub.status.borrow())
    }

    pub fn last_error(&self, id: &str) -> Option<&str> {
        self.submissions
            .get(id)
            .and_then(|sub| sub.last_error.as_deref())
    }

    /// Watch a submission's status changes.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<SubmissionStatus>> {
        self.submissions.get(id).map(|sub| sub.status.subscribe())
    }

    /// Forget submissions that finished at least `retention` ago. Pending
    /// ones are always kept. Returns how many were removed.
    pub fn prune_finished(&mut self, retention: Duration) -> usize {
        let now = Utc::now();
        let before = self.submissions.len();
        self.submissions.retain(|_, sub| match sub.finished_at {
            Some(finished) => (now - finished)
                .to_std()
                .map(|age| age < retention)
                .unwrap_or(true),
            None => true,
        });
        before - self.submissions.len()
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }
}
