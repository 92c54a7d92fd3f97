use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Call;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnouncementKind {
    Run,
    Result,
}

impl std::fmt::Display for AnnouncementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnouncementKind::Run => write!(f, "run"),
            AnnouncementKind::Result => write!(f, "result"),
        }
    }
}

/// Broadcast notice of a pending RUN or RESULT operation.
///
/// Carries only what a worker needs to decide whether to connect; the call
/// itself travels over the rendezvous channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    pub kind: AnnouncementKind,
    pub rendezvous_port: u16,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Announcement {
    pub fn run(call: &Call, rendezvous_port: u16) -> Self {
        Self {
            id: call.id(),
            kind: AnnouncementKind::Run,
            rendezvous_port,
            tags: call.tags().clone(),
        }
    }

    pub fn result(id: impl Into<String>, rendezvous_port: u16) -> Self {
        Self {
            id: id.into(),
            kind: AnnouncementKind::Result,
            rendezvous_port,
            tags: BTreeSet::new(),
        }
    }
}

/// What a worker reports for a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Value { value: Value },
    /// The call itself failed; delivered to the submitter as data.
    Error { message: String },
    NotFound { id: String },
}

impl Outcome {
    pub fn value(value: impl Into<Value>) -> Self {
        Outcome::Value {
            value: value.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outcome::Error {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Outcome::NotFound { .. })
    }

    /// Collapse into a plain result. `NotFound` maps to an error message.
    pub fn into_result(self) -> std::result::Result<Value, String> {
        match self {
            Outcome::Value { value } => Ok(value),
            Outcome::Error { message } => Err(message),
            Outcome::NotFound { id } => Err(format!("no cached result for {id}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlSignal {
    Hello,
    PayloadSent,
    NotMatched,
    ShuttingDown,
}

/// Unit of transfer on a rendezvous channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum Frame {
    Control(ControlSignal),
    Call(Call),
    /// Reply to the call sent on the same connection
    Outcome(Outcome),
    /// Reply to a RESULT lookup, naming the id it answers
    Answer { id: String, outcome: Outcome },
}

impl Frame {
    pub fn describe(&self) -> &'static str {
        match self {
            Frame::Control(ControlSignal::Hello) => "HELLO",
            Frame::Control(ControlSignal::PayloadSent) => "PAYLOAD_SENT",
            Frame::Control(ControlSignal::NotMatched) => "NOT_MATCHED",
            Frame::Control(ControlSignal::ShuttingDown) => "SHUTTING_DOWN",
            Frame::Call(_) => "call",
            Frame::Outcome(_) => "outcome",
            Frame::Answer { .. } => "answer",
        }
    }
}
