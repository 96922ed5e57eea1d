use thiserror::Error;

/// Error taxonomy for the dispatch core (partitioner, shard store, worker pool,
/// distributed queue, and streaming dispatcher).
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("partition {0} is full")]
    PartitionFull(usize),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("describer transient failure: {0}")]
    DescribeTransient(String),

    #[error("describer permanent failure: {0}")]
    DescribePermanent(String),

    #[error("distributed queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("object store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("client stream closed")]
    StreamClosed,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Classification used by the distributed queue's retry policy (§7): only
    /// these two kinds are retried with backoff, everything else is terminal
    /// on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::DescribeTransient(_) | CoreError::QueueUnavailable(_)
        )
    }

    /// Stable short tag for `TaskResult::Failed.error_kind` and for the
    /// `result{status:error}` event payload.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "InvalidInput",
            CoreError::PartitionFull(_) => "PartitionFull",
            CoreError::NotFound(_) => "NotFound",
            CoreError::DescribeTransient(_) => "DescribeTransient",
            CoreError::DescribePermanent(_) => "DescribePermanent",
            CoreError::QueueUnavailable(_) => "QueueUnavailable",
            CoreError::StorageUnavailable(_) => "StorageUnavailable",
            CoreError::StreamClosed => "StreamClosed",
            CoreError::Configuration(_) => "Configuration",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InvalidInput(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::StorageUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
