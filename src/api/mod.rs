//! REST surface (§6 External Interfaces): `/process`, `/ingest`, `/health`,
//! `/worker`, wired with the teacher's tower-http layer stack and an
//! `AppState` built once in `main` (§9 design note, replacing the source's
//! process-global singletons).

mod handlers;

use crate::config::Config;
use crate::describer::Describer;
use crate::objectstore::ObjectStore;
use crate::partitioner::Partitioner;
use crate::pool::WorkerPool;
use crate::queue::DistributedQueue;
use crate::shard_store::ShardStore;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const REQUEST_TIMEOUT_SECS: u64 = 600;
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

pub struct AppState {
    pub config: Config,
    pub pool: WorkerPool,
    pub store: Arc<ShardStore>,
    pub queue: Arc<DistributedQueue>,
    pub objects: Arc<dyn ObjectStore>,
    pub describer: Arc<dyn Describer>,
    pub partitioner: Partitioner,
    pub worker_leased: AtomicUsize,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/process", post(handlers::process))
        .route("/ingest", post(handlers::ingest))
        .route("/health", get(handlers::health))
        .route("/worker", post(handlers::worker_bootstrap).get(handlers::worker_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any)
                .allow_origin(Any),
        )
}
