//! In-memory priority queue for transcode jobs

use crate::models::Job;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Job with scheduling metadata.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Insertion sequence; breaks exact-timestamp ties deterministically
    seq: u64,
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.job.id == other.job.id
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority, earlier enqueue wins.
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => match other.enqueued_at.cmp(&self.enqueued_at) {
                Ordering::Equal => other.seq.cmp(&self.seq),
                ord => ord,
            },
            ord => ord,
        }
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Metrics for queue monitoring
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub total_enqueued: usize,
    pub total_dequeued: usize,
    pub peak_queue_size: usize,
}

/// Binary max-heap of jobs ordered by (priority desc, enqueue time asc).
pub struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    metrics: QueueMetrics,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            metrics: QueueMetrics::default(),
        }
    }

    pub fn push(&mut self, job: Job, enqueued_at: DateTime<Utc>) {
        let entry = QueuedJob {
            priority: job.priority,
            job,
            enqueued_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.heap.push(entry);

        self.metrics.total_enqueued += 1;
        self.metrics.peak_queue_size = self.metrics.peak_queue_size.max(self.heap.len());
    }

    pub fn pop(&mut self) -> Option<QueuedJob> {
        let entry = self.heap.pop()?;
        self.metrics.total_dequeued += 1;
        Some(entry)
    }

    /// Return a popped entry after a failed dispatch; keeps its original
    /// enqueue ordering.
    pub fn push_back(&mut self, entry: QueuedJob) {
        self.metrics.total_dequeued -= 1;
        self.heap.push(entry);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
