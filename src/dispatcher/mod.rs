//! Streaming Dispatcher (§4.5): the request-scoped orchestrator that fuses
//! ingestion, partition assignment, shard-store writes, worker-pool
//! submission, and event-stream multiplexing into one pipeline.

pub mod events;

use crate::error::CoreError;
use crate::pool::WorkerPool;
use crate::shard_store::ShardStore;
use crate::task::{Payload, Task, TaskResult};
use events::{CompletePayload, DispatchEvent, LogType, PartitionSnapshot, ProgressPayload, Stats};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// One image from an incoming batch, already pulled out of the multipart
/// form: `imageIds[i]` aligned by index with `images[i]` (§6).
pub struct ImageInput {
    pub id: String,
    pub filename: String,
    pub bytes: bytes::Bytes,
}

pub struct Dispatcher {
    pool: WorkerPool,
    store: Arc<ShardStore>,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, store: Arc<ShardStore>) -> Self {
        Self { pool, store }
    }

    /// Runs the full single-batch pipeline (§4.5 steps 1-8), emitting every
    /// event onto `tx`. Does not close `tx` — callers decide when the
    /// channel (and therefore the stream) ends.
    pub async fn run_batch(&self, images: Vec<ImageInput>, tx: UnboundedSender<DispatchEvent>) {
        let total = images.len();
        let stats = Arc::new(Mutex::new(Stats::new(total)));
        emit(&tx, DispatchEvent::Stats { stats: *stats.lock() });
        emit(&tx, DispatchEvent::log(LogType::Info, format!("batch of {total} images arrived")));

        if total == 0 {
            emit(&tx, DispatchEvent::log(LogType::Success, "batch complete".to_string()));
            return;
        }

        emit(&tx, DispatchEvent::Workers { workers: self.pool.worker_snapshots() });
        emit(&tx, self.partitions_event(None));

        // Preparation phase (§4.5 step 5): sequential, in input order. Also
        // records each task's partition so the assignment callback below can
        // report it on the `processing` event instead of a placeholder.
        let mut tasks = Vec::with_capacity(total);
        let mut task_partitions = HashMap::with_capacity(total);
        for image in images {
            let partition = self.store.partitioner().partition(&image.id);
            if let Err(e) = self.store.store(&image.id, &image.bytes) {
                emit(&tx, DispatchEvent::log(LogType::Error, format!("store failed for {}: {e}", image.id)));
            }
            emit(&tx, DispatchEvent::log(LogType::Partition, format!("{} assigned to partition {partition}", image.filename)));
            emit(&tx, self.partitions_event(None));
            task_partitions.insert(image.id.clone(), partition);
            tasks.push(Task::new(image.id, image.filename, Payload::Inline(image.bytes), partition));
        }

        // Assignment phase (§4.5 step 4): the callback fires synchronously
        // from the coordinator, off the async task driving this function, so
        // it only touches the shared Stats lock and the event channel.
        let assign_tx = tx.clone();
        let assign_stats = stats.clone();
        let assign_workers = self.pool.clone();
        let task_partitions = Arc::new(task_partitions);
        self.pool.set_assign_callback(Some(Arc::new(move |worker_id, _queue_size, task_id| {
            let snapshot = {
                let mut s = assign_stats.lock();
                s.pending -= 1;
                s.processing += 1;
                *s
            };
            let partition = task_partitions.get(task_id).copied().unwrap_or(0);
            emit(&assign_tx, DispatchEvent::processing(task_id, partition, worker_id));
            emit(&assign_tx, DispatchEvent::Stats { stats: snapshot });
            emit(&assign_tx, DispatchEvent::Workers { workers: assign_workers.worker_snapshots() });
        })));

        // Submission phase (§4.5 step 6): fire every task into the pool
        // without awaiting, so the coordinator can saturate all workers.
        let mut pending: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| self.pool.submit(task))
            .collect();

        // Completion phase (§4.5 step 7): in whatever order futures resolve.
        while let Some(resolved) = pending.next().await {
            let Ok(result) = resolved else {
                // The oneshot sender was dropped without a reply; treat as an
                // informational stream-side failure, never surfaced as a
                // second terminal event for a task that already got one.
                continue;
            };
            self.emit_terminal(&tx, &stats, result);
        }

        self.pool.set_assign_callback(None);
        emit(&tx, DispatchEvent::log(LogType::Success, "batch complete".to_string()));
    }

    /// Bulk ingest (§4.6): chunks `images` into `batch_size`-sized sub-batches
    /// and drives `run_batch` per sub-batch sequentially, rather than
    /// duplicating partition/submit/stream logic.
    pub async fn run_ingest(
        &self,
        images: Vec<ImageInput>,
        dataset_name: String,
        batch_size: usize,
        tx: UnboundedSender<DispatchEvent>,
    ) {
        let total_images = images.len();
        let batch_size = batch_size.max(1);
        let total_batches = total_images.div_ceil(batch_size).max(1);
        emit(&tx, DispatchEvent::log(LogType::Info, format!("ingesting {total_images} images into {dataset_name}")));

        let mut total_ingested = 0usize;
        let mut chunks = images.into_iter().peekable();
        for batch_index in 0..total_batches {
            let mut chunk = Vec::with_capacity(batch_size);
            while chunk.len() < batch_size {
                match chunks.next() {
                    Some(image) => chunk.push(image),
                    None => break,
                }
            }
            let chunk_len = chunk.len();
            self.run_batch(chunk, tx.clone()).await;
            total_ingested += chunk_len;

            emit(
                &tx,
                DispatchEvent::Progress(ProgressPayload {
                    batch_index,
                    total_batches,
                    batch_size: chunk_len,
                    total_ingested,
                    total_images,
                }),
            );
        }

        emit(
            &tx,
            DispatchEvent::Complete(CompletePayload {
                total_ingested,
                dataset_name,
                message: "ingest complete".to_string(),
            }),
        );
    }

    fn emit_terminal(&self, tx: &UnboundedSender<DispatchEvent>, stats: &Arc<Mutex<Stats>>, result: TaskResult) {
        let snapshot = {
            let mut s = stats.lock();
            s.processing -= 1;
            match &result {
                TaskResult::Completed { .. } => s.completed += 1,
                TaskResult::Failed { .. } => s.errors += 1,
            }
            *s
        };

        let event = match result {
            TaskResult::Completed {
                task_id,
                description,
                worker_id,
                partition,
                elapsed_ms,
            } => DispatchEvent::completed(task_id, description, partition, worker_id, elapsed_ms),
            TaskResult::Failed {
                task_id,
                message,
                worker_id,
                partition,
                elapsed_ms,
                ..
            } => DispatchEvent::failed(task_id, message, partition, worker_id, elapsed_ms),
        };
        emit(tx, event);
        emit(tx, DispatchEvent::Stats { stats: snapshot });
        emit(tx, DispatchEvent::Workers { workers: self.pool.worker_snapshots() });
    }

    fn partitions_event(&self, message: Option<String>) -> DispatchEvent {
        let stats = self.store.stats();
        let partitions = stats
            .partitions
            .into_iter()
            .map(|p| PartitionSnapshot {
                id: p.id,
                item_count: p.item_count,
                size: p.byte_size,
            })
            .collect();
        DispatchEvent::Partitions { partitions, message }
    }

    /// Validates a multipart batch's shape before any partition assignment
    /// runs (§7: `InvalidInput` aborts the whole batch with a single
    /// `error` event before any `result`).
    pub fn validate_batch(images: &[Option<bytes::Bytes>], ids: &[String]) -> Result<(), CoreError> {
        if images.len() != ids.len() {
            return Err(CoreError::InvalidInput(format!(
                "{} images but {} imageIds",
                images.len(),
                ids.len()
            )));
        }
        if images.iter().any(|b| b.is_none()) {
            return Err(CoreError::InvalidInput("missing image part".to_string()));
        }
        Ok(())
    }
}

fn emit(tx: &UnboundedSender<DispatchEvent>, event: DispatchEvent) {
    // A dropped receiver means the client disconnected; §5/§7 StreamClosed
    // is informational and must not abort in-flight work.
    let _ = tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describer::MockDescriber;
    use crate::partitioner::Partitioner;
    use tokio::sync::mpsc;

    fn dispatcher(workers: usize) -> Dispatcher {
        let pool = WorkerPool::new(workers, Arc::new(MockDescriber::always("a description")));
        let store = Arc::new(ShardStore::new(Partitioner::new(4, 1).unwrap()));
        Dispatcher::new(pool, store)
    }

    fn image(id: &str) -> ImageInput {
        ImageInput {
            id: id.to_string(),
            filename: format!("{id}.jpg"),
            bytes: bytes::Bytes::from_static(b"bytes"),
        }
    }

    #[tokio::test]
    async fn empty_batch_emits_stats_and_terminates_with_no_results() {
        let d = dispatcher(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.run_batch(vec![], tx).await;

        let mut saw_stats_zero = false;
        let mut saw_result = false;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                DispatchEvent::Stats { stats } if stats.total == 0 => saw_stats_zero = true,
                DispatchEvent::Result(_) => saw_result = true,
                _ => {}
            }
        }
        assert!(saw_stats_zero);
        assert!(!saw_result);
    }

    #[tokio::test]
    async fn every_task_gets_processing_then_terminal_event() {
        let d = dispatcher(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.run_batch(vec![image("a"), image("b"), image("c")], tx).await;

        let mut processing = std::collections::HashSet::new();
        let mut terminal = std::collections::HashSet::new();
        while let Ok(ev) = rx.try_recv() {
            if let DispatchEvent::Result(r) = ev {
                match r.status {
                    Some(events::ResultStatus::Processing) => {
                        processing.insert(r.id);
                    }
                    Some(events::ResultStatus::Completed) | Some(events::ResultStatus::Error) => {
                        terminal.insert(r.id);
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(processing.len(), 3);
        assert_eq!(terminal.len(), 3);
        assert_eq!(processing, terminal);
    }

    #[tokio::test]
    async fn stats_invariant_holds_at_every_emission() {
        let d = dispatcher(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.run_batch(vec![image("a"), image("b")], tx).await;

        let mut saw_any = false;
        while let Ok(ev) = rx.try_recv() {
            if let DispatchEvent::Stats { stats } = ev {
                assert!(stats.is_consistent());
                saw_any = true;
            }
        }
        assert!(saw_any);
    }

    #[tokio::test]
    async fn describer_failure_counts_as_error_not_completed() {
        let pool = WorkerPool::new(1, Arc::new(MockDescriber::always_failing(CoreError::DescribePermanent)));
        let store = Arc::new(ShardStore::new(Partitioner::new(4, 1).unwrap()));
        let d = Dispatcher::new(pool, store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.run_batch(vec![image("a")], tx).await;

        let mut final_stats = Stats::default();
        while let Ok(ev) = rx.try_recv() {
            if let DispatchEvent::Stats { stats } = ev {
                final_stats = stats;
            }
        }
        assert_eq!(final_stats.errors, 1);
        assert_eq!(final_stats.completed, 0);
    }

    #[test]
    fn validate_batch_rejects_mismatched_lengths() {
        let images = vec![Some(bytes::Bytes::new())];
        let ids: Vec<String> = vec![];
        assert!(Dispatcher::validate_batch(&images, &ids).is_err());
    }

    #[test]
    fn validate_batch_rejects_missing_image_part() {
        let images = vec![None];
        let ids = vec!["a".to_string()];
        assert!(Dispatcher::validate_batch(&images, &ids).is_err());
    }
}
