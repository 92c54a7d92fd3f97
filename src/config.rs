use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{Result, SwarmError};

/// Engine-wide configuration.
///
/// Per-process settings ([`WorkerConfig`], [`DispatcherConfig`]) are derived
/// from this, so a single value describes a whole deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks to spawn
    pub worker_count: usize,
    /// Capability tags per worker, indexed by worker position.
    /// Workers past the end of this list declare no tags.
    pub worker_tags: Vec<BTreeSet<String>>,
    /// Disable tag filtering: every worker accepts every RUN announcement.
    pub local: bool,
    /// How long a worker keeps a computed outcome
    pub cache_ttl_ms: u64,
    /// Upper bound on cached outcomes per worker
    pub cache_capacity: u64,
    /// Broadcast queue poll timeout; also bounds shutdown latency
    pub poll_interval_ms: u64,
    /// Lookups performed by `Engine::result` before giving up
    pub result_attempts: u32,
    /// Jittered delay between missed lookups
    pub result_retry_min_ms: u64,
    pub result_retry_max_ms: u64,
    /// How long a rendezvous listener waits for a worker to connect
    pub rendezvous_timeout_ms: u64,
    /// Broadcasts of a single RUN announcement before it is unfulfilled
    pub max_dispatch_attempts: u32,
    /// Concurrent calls a single worker may execute
    pub execution_slots: usize,
    /// Announcements that may sit unconsumed in the broadcast queue
    pub queue_capacity: usize,
    /// Engine requests that may wait in the dispatcher's inbox
    pub dispatcher_inbox_capacity: usize,
    /// Time each task gets to exit after shutdown before it is aborted
    pub shutdown_grace_ms: u64,
    /// Address rendezvous listeners bind to and workers connect to
    pub rendezvous_host: IpAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            worker_tags: Vec::new(),
            local: false,
            cache_ttl_ms: 10 * 60 * 1000,
            cache_capacity: 10_000,
            poll_interval_ms: 100,
            result_attempts: 10,
            result_retry_min_ms: 10,
            result_retry_max_ms: 50,
            rendezvous_timeout_ms: 5_000,
            max_dispatch_attempts: 8,
            execution_slots: 1,
            queue_capacity: 1_024,
            dispatcher_inbox_capacity: 100,
            shutdown_grace_ms: 5_000,
            rendezvous_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl EngineConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    /// Single-process mode: tag filtering off.
    pub fn local(worker_count: usize) -> Self {
        Self {
            worker_count,
            local: true,
            ..Default::default()
        }
    }

    /// Declare capability tags for the worker at `index`.
    pub fn with_worker_tags<I, S>(mut self, index: usize, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.worker_tags.len() <= index {
            self.worker_tags.resize(index + 1, BTreeSet::new());
        }
        self.worker_tags[index] = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_result_attempts(mut self, attempts: u32) -> Self {
        self.result_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(SwarmError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.worker_tags.len() > self.worker_count {
            return Err(SwarmError::InvalidConfig(format!(
                "tags declared for {} workers but only {} configured",
                self.worker_tags.len(),
                self.worker_count
            )));
        }
        if self.execution_slots == 0 {
            return Err(SwarmError::InvalidConfig(
                "execution_slots must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 || self.dispatcher_inbox_capacity == 0 {
            return Err(SwarmError::InvalidConfig(
                "queue_capacity and dispatcher_inbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.result_attempts == 0 || self.max_dispatch_attempts == 0 {
            return Err(SwarmError::InvalidConfig(
                "attempt counts must be at least 1".to_string(),
            ));
        }
        if self.cache_ttl_ms == 0 || self.poll_interval_ms == 0 || self.rendezvous_timeout_ms == 0
        {
            return Err(SwarmError::InvalidConfig(
                "cache_ttl_ms, poll_interval_ms and rendezvous_timeout_ms must be non-zero"
                    .to_string(),
            ));
        }
        if self.result_retry_min_ms > self.result_retry_max_ms {
            return Err(SwarmError::InvalidConfig(format!(
                "result_retry_min_ms ({}) exceeds result_retry_max_ms ({})",
                self.result_retry_min_ms, self.result_retry_max_ms
            )));
        }
        Ok(())
    }

    pub fn worker_config(&self, index: usize) -> WorkerConfig {
        WorkerConfig {
            worker_id: index as u64 + 1,
            tags: self.worker_tags.get(index).cloned().unwrap_or_default(),
            local: self.local,
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            cache_capacity: self.cache_capacity,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            io_timeout: Duration::from_millis(self.rendezvous_timeout_ms),
            execution_slots: self.execution_slots,
            rendezvous_host: self.rendezvous_host,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            rendezvous_host: self.rendezvous_host,
            rendezvous_timeout: Duration::from_millis(self.rendezvous_timeout_ms),
            max_dispatch_attempts: self.max_dispatch_attempts,
            inbox_capacity: self.dispatcher_inbox_capacity,
            submission_retention: Duration::from_millis(self.cache_ttl_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: u64,
    pub tags: BTreeSet<String>,
    pub local: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub poll_interval: Duration,
    /// Bound on each rendezvous connect/read
    pub io_timeout: Duration,
    pub execution_slots: usize,
    pub rendezvous_host: IpAddr,
}

impl WorkerConfig {
    /// Whether this worker should run a job requiring `required` tags.
    ///
    /// Untagged jobs run anywhere. Tagged jobs need at least one shared tag
    /// unless the worker is in local mode.
    pub fn accepts(&self, required: &BTreeSet<String>) -> bool {
        self.local || required.is_empty() || !self.tags.is_disjoint(required)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub rendezvous_host: IpAddr,
    pub rendezvous_timeout: Duration,
    pub max_dispatch_attempts: u32,
    pub inbox_capacity: usize,
    /// How long a finished submission stays queryable. Matches the cache
    /// TTL, after which its outcome is gone from every worker anyway.
    pub submission_retention: Duration,
}
