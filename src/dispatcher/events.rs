//! Wire shapes for the `text/event-stream` records described in §6. Every
//! event serializes to `{"type": ..., ...}`; the client discriminates on
//! `type` and keys per-task state by `result.id`.

use crate::pool::WorkerSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub errors: usize,
}

impl Stats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            pending: total,
            processing: 0,
            completed: 0,
            errors: 0,
        }
    }

    /// Invariant checked continuously in tests (§7, §8): counters always sum
    /// back to the batch total.
    pub fn is_consistent(&self) -> bool {
        self.pending + self.processing + self.completed + self.errors == self.total
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Info,
    Success,
    Error,
    Worker,
    Partition,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSnapshot {
    pub id: usize,
    pub item_count: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub id: String,
    pub status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_thread: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub batch_index: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub total_ingested: usize,
    pub total_images: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub total_ingested: usize,
    pub dataset_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispatchEvent {
    Stats {
        stats: Stats,
    },
    Log {
        #[serde(rename = "logType")]
        log_type: LogType,
        message: String,
    },
    Workers {
        workers: Vec<WorkerSnapshot>,
    },
    Partitions {
        partitions: Vec<PartitionSnapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Result(ResultPayload),
    Progress(ProgressPayload),
    Complete(CompletePayload),
    Error {
        message: String,
    },
}

impl DispatchEvent {
    pub fn log(log_type: LogType, message: impl Into<String>) -> Self {
        DispatchEvent::Log {
            log_type,
            message: message.into(),
        }
    }

    pub fn processing(id: impl Into<String>, partition: usize, worker_thread: usize) -> Self {
        DispatchEvent::Result(ResultPayload {
            id: id.into(),
            status: Some(ResultStatus::Processing),
            partition: Some(partition),
            worker_thread: Some(worker_thread),
            ..Default::default()
        })
    }

    pub fn completed(
        id: impl Into<String>,
        description: String,
        partition: usize,
        worker_thread: usize,
        processing_time: u64,
    ) -> Self {
        DispatchEvent::Result(ResultPayload {
            id: id.into(),
            status: Some(ResultStatus::Completed),
            description: Some(description),
            partition: Some(partition),
            worker_thread: Some(worker_thread),
            processing_time: Some(processing_time),
            ..Default::default()
        })
    }

    pub fn failed(
        id: impl Into<String>,
        error: String,
        partition: usize,
        worker_thread: Option<usize>,
        processing_time: u64,
    ) -> Self {
        DispatchEvent::Result(ResultPayload {
            id: id.into(),
            status: Some(ResultStatus::Error),
            partition: Some(partition),
            worker_thread,
            processing_time: Some(processing_time),
            error: Some(error),
            ..Default::default()
        })
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).expect("event payloads are always serializable")
    }
}
