use crate::task::{Priority, Task};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Lease {
    pub worker_id: usize,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
pub enum JobState {
    /// Eligible for leasing once `available_at` has passed (used both for
    /// the initial enqueue and for backoff delays between retries).
    Ready { available_at: Instant },
    Leased(Lease),
    Completed,
    Failed,
}

/// A Task plus queue-plane metadata (§3 QueuedJob).
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub task: Task,
    pub priority: Priority,
    pub attempts: u32,
    pub stalls: u32,
    pub state: JobState,
}

impl QueuedJob {
    pub fn new(task: Task, priority: Priority) -> Self {
        Self {
            task,
            priority,
            attempts: 0,
            stalls: 0,
            state: JobState::Ready {
                available_at: Instant::now(),
            },
        }
    }

    pub fn is_ready_at(&self, now: Instant) -> bool {
        matches!(self.state, JobState::Ready { available_at } if available_at <= now)
    }
}
