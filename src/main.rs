use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tracing::info;
use vista_dispatch::api::{build_router, AppState};
use vista_dispatch::config::Config;
use vista_dispatch::describer::OllamaDescriber;
use vista_dispatch::objectstore::MemoryObjectStore;
use vista_dispatch::partitioner::Partitioner;
use vista_dispatch::pool::WorkerPool;
use vista_dispatch::queue::DistributedQueue;
use vista_dispatch::shard_store::ShardStore;
use vista_dispatch::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    print_banner();

    let config = Config::from_env()?;
    info!("loaded configuration: worker_mode={}", config.worker_mode);

    let partitioner = Partitioner::new(config.partition_count, config.replication_factor)?;
    let store = Arc::new(ShardStore::new(partitioner));
    let describer = Arc::new(OllamaDescriber::new(config.ollama_url.clone(), "llava"));
    let pool = WorkerPool::new(config.worker_count, describer.clone());
    let queue = Arc::new(DistributedQueue::new());
    let objects = Arc::new(MemoryObjectStore::new());

    let addr = format!("{}:{}", config.hostname, config.port);
    let state = Arc::new(AppState {
        partitioner,
        pool,
        store,
        queue,
        objects,
        describer,
        worker_leased: AtomicUsize::new(0),
        config,
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("vista-dispatch listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              vista-dispatch — image batch dispatcher         ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}
