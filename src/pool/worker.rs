use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A single execution slot. `busy`/`processed` are atomics so a worker's own
/// completion callback can flip state without taking the coordinator's lock
/// (§4.3 ambient concurrency note).
pub struct WorkerRecord {
    pub id: usize,
    busy: AtomicBool,
    processed: AtomicU64,
    current_task: parking_lot::Mutex<Option<String>>,
}

impl WorkerRecord {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            busy: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            current_task: parking_lot::Mutex::new(None),
        }
    }

    pub fn set_current_task(&self, task_id: Option<String>) {
        *self.current_task.lock() = task_id;
    }

    pub fn current_task(&self) -> Option<String> {
        self.current_task.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Increments at assignment time, not completion, so the fallback
    /// selection branch sees a live fairness signal (§4.3).
    pub fn mark_assigned(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            busy: self.is_busy(),
            processed: self.processed(),
            current_task: self.current_task(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub busy: bool,
    pub processed: u64,
    #[serde(rename = "currentTask", skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}
