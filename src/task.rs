//! Shared task types crossing the Worker Pool / Distributed Queue boundary.

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Where the image payload lives. Inline bytes for the in-process path;
/// an object-store key for the distributed path (§3 Task).
#[derive(Debug, Clone)]
pub enum Payload {
    Inline(bytes::Bytes),
    ObjectKey { bucket: String, key: String },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub filename: String,
    pub payload: Payload,
    pub partition: usize,
    pub submitted_at: Instant,
    pub priority: Priority,
}

impl Task {
    pub fn new(id: String, filename: String, payload: Payload, partition: usize) -> Self {
        Self {
            id,
            filename,
            payload,
            partition,
            submitted_at: Instant::now(),
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Terminal outcome for a task (§3 TaskResult). Produced once, never mutated.
#[derive(Debug, Clone)]
pub enum TaskResult {
    Completed {
        task_id: String,
        description: String,
        worker_id: usize,
        partition: usize,
        elapsed_ms: u64,
    },
    Failed {
        task_id: String,
        error_kind: &'static str,
        message: String,
        worker_id: Option<usize>,
        partition: usize,
        elapsed_ms: u64,
        attempts: u32,
    },
}

impl TaskResult {
    pub fn task_id(&self) -> &str {
        match self {
            TaskResult::Completed { task_id, .. } => task_id,
            TaskResult::Failed { task_id, .. } => task_id,
        }
    }
}
