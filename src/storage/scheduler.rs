//! Batches commits to a [`StorageSink`], tuning the batch size from measured commit latency.
//!
//! Readings are inserted immediately, only the commit is batched. Because the time a
//! commit takes isn't known in advance, it's measured and `commit_every` is adjusted
//! following a rule similar to TCP Reno: grow by one while commits finish well inside
//! the sensor's notification period, halve as soon as one doesn't.

use std::time::{Duration, Instant};

use tracing::debug;

use super::{CommitMetadata, StorageSink};
use crate::errors::StorageError;
use crate::heart_rate::Reading;

pub const DEFAULT_MIN_BATCH: u32 = 2;
pub const DEFAULT_MAX_BATCH: u32 = 120;
pub const DEFAULT_INITIAL_BATCH: u32 = 5;
pub const DEFAULT_GRACE_RATIO: f64 = 2.0 / 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLimits {
    pub min_batch: u32,
    pub max_batch: u32,
    /// Fraction of the notification period a commit may take before it counts as slow
    pub grace_ratio: f64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            min_batch: DEFAULT_MIN_BATCH,
            max_batch: DEFAULT_MAX_BATCH,
            grace_ratio: DEFAULT_GRACE_RATIO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitBatch {
    pub pending_count: u32,
    pub commit_every: u32,
}

impl CommitBatch {
    pub fn new(initial: u32, limits: &BatchLimits) -> Self {
        Self {
            pending_count: 0,
            commit_every: initial.clamp(limits.min_batch, limits.max_batch),
        }
    }

    /// Additive increase if `latency` fit in the grace window, multiplicative decrease otherwise.
    pub fn adjust(&mut self, latency: Duration, period: f64, limits: &BatchLimits) {
        let grace_window = period * limits.grace_ratio;
        self.commit_every = if latency.as_secs_f64() < grace_window {
            (self.commit_every + 1).min(limits.max_batch)
        } else {
            (self.commit_every / 2).max(limits.min_batch)
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitOutcome {
    pub committed: bool,
    pub latency: Option<Duration>,
}

pub struct CommitScheduler<K: StorageSink> {
    sink: K,
    batch: CommitBatch,
    limits: BatchLimits,
}

impl<K: StorageSink> CommitScheduler<K> {
    pub fn new(sink: K, limits: BatchLimits, initial_batch: u32) -> Self {
        Self {
            sink,
            batch: CommitBatch::new(initial_batch, &limits),
            limits,
        }
    }

    pub fn batch(&self) -> CommitBatch {
        self.batch
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Persists `reading`, committing once enough readings are pending.
    ///
    /// `period` is the current notification period estimate in seconds.
    pub fn record(&mut self, reading: &Reading, period: f64) -> Result<CommitOutcome, StorageError> {
        self.sink.insert_reading(reading)?;
        self.batch.pending_count += 1;

        if self.batch.pending_count < self.batch.commit_every {
            return Ok(CommitOutcome::default());
        }

        let latency = self.commit()?;
        self.batch.adjust(latency, period, &self.limits);
        debug!(
            "Commit took {:.4}s, committing every {} readings",
            latency.as_secs_f64(),
            self.batch.commit_every
        );
        Ok(CommitOutcome {
            committed: true,
            latency: Some(latency),
        })
    }

    /// Commits whatever is pending without touching `commit_every`.
    pub fn flush(&mut self) -> Result<Option<Duration>, StorageError> {
        if self.batch.pending_count == 0 {
            return Ok(None);
        }
        let latency = self.commit()?;
        debug!("Flushed pending readings in {:.4}s", latency.as_secs_f64());
        Ok(Some(latency))
    }

    /// Flushes and makes the last commit's metadata row durable too.
    pub fn finish(mut self) -> Result<K, StorageError> {
        self.flush()?;
        self.sink.commit()?;
        Ok(self.sink)
    }

    fn commit(&mut self) -> Result<Duration, StorageError> {
        let timestamp = chrono::Utc::now().timestamp();
        let started = Instant::now();
        self.sink.commit()?;
        let latency = started.elapsed();

        // Lands in the next transaction
        self.sink.insert_commit_metadata(&CommitMetadata {
            timestamp,
            commit_duration: latency.as_secs_f64(),
            commit_every: self.batch.commit_every,
        })?;
        self.batch.pending_count = 0;
        Ok(latency)
    }
}
