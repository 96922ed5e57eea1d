//! Worker Pool & Coordinator (§4.3): one coordinator task, N parallel
//! workers, a FIFO queue, and an assignment callback — the only coupling
//! between the pool and the Streaming Dispatcher.

pub mod worker;

use crate::describer::Describer;
use crate::task::{Task, TaskResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use worker::WorkerRecord;

pub use worker::WorkerSnapshot;

/// `(worker_id, remaining_queue_size, task_id)`, fired right before the
/// worker's describe call starts, i.e. exactly at `Queued -> Processing`.
pub type AssignCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

struct Pending {
    task: Task,
    reply: oneshot::Sender<TaskResult>,
}

struct Shared {
    workers: Vec<WorkerRecord>,
    describer: Arc<dyn Describer>,
    queue: parking_lot::Mutex<VecDeque<Pending>>,
    in_flight: AtomicUsize,
    notify: Notify,
    on_assign: parking_lot::RwLock<Option<AssignCallback>>,
}

/// Handle to a running pool. Cloning shares the same workers/queue; the
/// coordinator loop runs as a detached tokio task for the handle's lifetime.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, describer: Arc<dyn Describer>) -> Self {
        assert!(worker_count > 0, "worker pool needs at least one worker");
        let workers = (0..worker_count).map(WorkerRecord::new).collect();
        let shared = Arc::new(Shared {
            workers,
            describer,
            queue: parking_lot::Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            notify: Notify::new(),
            on_assign: parking_lot::RwLock::new(None),
        });
        let pool = Self { shared };
        pool.spawn_coordinator();
        pool
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Registers the Dispatcher's assignment callback (§4.5 step 4). A pool
    /// serves one request-scoped callback at a time; callers install it
    /// before submitting and clear it when the batch finishes.
    pub fn set_assign_callback(&self, cb: Option<AssignCallback>) {
        *self.shared.on_assign.write() = cb;
    }

    pub fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.shared.workers.iter().map(|w| w.snapshot()).collect()
    }

    /// Non-blocking, thread-safe: appends to the FIFO queue and wakes the
    /// coordinator if it is idle. Resolves with the task's terminal result.
    pub fn submit(&self, task: Task) -> oneshot::Receiver<TaskResult> {
        let (tx, rx) = oneshot::channel();
        self.shared.queue.lock().push_back(Pending { task, reply: tx });
        self.shared.notify.notify_one();
        rx
    }

    fn spawn_coordinator(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                let worker_count = shared.workers.len();
                let in_flight = shared.in_flight.load(Ordering::Acquire);

                if in_flight >= worker_count {
                    shared.notify.notified().await;
                    continue;
                }

                let popped = shared.queue.lock().pop_front();
                let Some(pending) = popped else {
                    // Queue empty: coordinator goes idle until submit() or a
                    // completion wakes it again (§9 replaces the source's
                    // bounded polling sleep with a Notify).
                    shared.notify.notified().await;
                    continue;
                };

                dispatch(shared.clone(), pending);
            }
        });
    }
}

fn select_worker(shared: &Shared) -> &WorkerRecord {
    shared
        .workers
        .iter()
        .find(|w| !w.is_busy())
        .unwrap_or_else(|| {
            shared
                .workers
                .iter()
                .min_by_key(|w| w.processed())
                .expect("worker pool always has at least one worker")
        })
}

fn dispatch(shared: Arc<Shared>, pending: Pending) {
    let Pending { task, reply } = pending;
    let remaining_queue_size = shared.queue.lock().len();

    let worker = select_worker(&shared);
    let worker_id = worker.id;
    worker.set_busy(true);
    worker.mark_assigned();
    worker.set_current_task(Some(task.id.clone()));

    if let Some(cb) = shared.on_assign.read().as_ref() {
        cb(worker_id, remaining_queue_size, &task.id);
    }

    shared.in_flight.fetch_add(1, Ordering::AcqRel);

    let describer = shared.describer.clone();
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let bytes = task_payload_bytes(&task);
        let outcome = describer.describe(&bytes).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(description) => TaskResult::Completed {
                task_id: task.id.clone(),
                description,
                worker_id,
                partition: task.partition,
                elapsed_ms,
            },
            Err(e) => TaskResult::Failed {
                task_id: task.id.clone(),
                error_kind: e.kind(),
                message: e.to_string(),
                worker_id: Some(worker_id),
                partition: task.partition,
                elapsed_ms,
                attempts: 1,
            },
        };

        shared.workers[worker_id].set_busy(false);
        shared.workers[worker_id].set_current_task(None);
        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        shared.notify.notify_one();
        let _ = reply.send(result);
    });
}

fn task_payload_bytes(task: &Task) -> bytes::Bytes {
    match &task.payload {
        crate::task::Payload::Inline(b) => b.clone(),
        crate::task::Payload::ObjectKey { bucket, key } => {
            bytes::Bytes::from(format!("{bucket}/{key}").into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describer::MockDescriber;
    use crate::error::CoreError;
    use crate::task::Payload;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::time::Duration;

    fn inline_task(id: &str) -> Task {
        Task::new(
            id.to_string(),
            format!("{id}.jpg"),
            Payload::Inline(bytes::Bytes::from_static(b"img")),
            0,
        )
    }

    #[tokio::test]
    async fn single_task_completes() {
        let pool = WorkerPool::new(2, Arc::new(MockDescriber::always("a cat")));
        let rx = pool.submit(inline_task("a"));
        let result = rx.await.unwrap();
        match result {
            TaskResult::Completed { description, .. } => assert_eq!(description, "a cat"),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_worker_count() {
        let pool = WorkerPool::new(2, Arc::new(MockDescriber::always("x")));
        let max_seen = Arc::new(Counter::new(0));
        let seen = max_seen.clone();
        let pool_for_cb = pool.clone();
        pool.set_assign_callback(Some(Arc::new(move |_w, _q, _t| {
            let in_flight = pool_for_cb.in_flight();
            seen.fetch_max(in_flight + 1, Ordering::SeqCst);
        })));

        let mut receivers = Vec::new();
        for i in 0..8 {
            receivers.push(pool.submit(inline_task(&format!("t{i}"))));
        }
        for rx in receivers {
            rx.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn describer_error_surfaces_as_failed_and_worker_goes_idle() {
        let pool = WorkerPool::new(1, Arc::new(MockDescriber::always_failing(CoreError::DescribePermanent)));
        let rx = pool.submit(inline_task("a"));
        let result = rx.await.unwrap();
        assert!(matches!(result, TaskResult::Failed { .. }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn fallback_selection_prefers_lowest_processed_when_all_busy() {
        // A single slow worker forces every subsequent submission through the
        // fallback branch; all tasks still resolve exactly once.
        let pool = WorkerPool::new(1, Arc::new(MockDescriber::always("x")));
        let mut receivers = Vec::new();
        for i in 0..5 {
            receivers.push(pool.submit(inline_task(&format!("t{i}"))));
        }
        for rx in receivers {
            assert!(rx.await.is_ok());
        }
    }
}
