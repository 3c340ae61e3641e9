use clap::Parser;
use redis::aio::ConnectionManager;
use scan_orchestrator::config::{BrokerArgs, Cli, Command, ServeArgs, WorkerArgs};
use scan_orchestrator::executor::ScanExecutor;
use scan_orchestrator::queue::{InMemoryQueue, RedisQueue, TaskQueue};
use scan_orchestrator::registry::{InMemoryRegistry, RedisRegistry, ScanRegistry};
use scan_orchestrator::scan::handlers::router;
use scan_orchestrator::scan::{ScanProducer, StatusService};
use scan_orchestrator::worker::ScanWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        signal_token.cancel();
    });

    match cli.command {
        Command::Serve(args) => serve(args, shutdown).await,
        Command::Worker(args) => work(args, shutdown).await,
    }
}

async fn serve(args: ServeArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    // 1. Backends:
    let mut consumer = None;
    let (queue, registry): (Arc<dyn TaskQueue>, Arc<dyn ScanRegistry>) =
        match args.broker.redis_url.as_deref() {
            Some(redis_url) => {
                let (queue, registry) =
                    connect_redis(redis_url, &args.broker, &args.consumer_id()).await?;
                if args.workers > 0 {
                    consumer = Some(start_consumer(queue.clone(), shutdown.clone()).await?);
                }
                (queue, registry)
            }
            None => {
                tracing::info!("REDIS_URL is not set; using in-memory queue and registry");
                (Arc::new(InMemoryQueue::new()), Arc::new(InMemoryRegistry::new()))
            }
        };

    // 2. Embedded workers. Without a broker nothing else can drain the queue.
    let worker_count = if args.broker.redis_url.is_none() {
        args.workers.max(1)
    } else {
        args.workers
    };
    let handles = start_workers(
        &args,
        queue.clone(),
        registry.clone(),
        worker_count,
        shutdown.clone(),
    );

    // 3. Stats reporter:
    spawn_stats_reporter(queue.clone(), shutdown.clone());

    // 4. HTTP server:
    let producer = ScanProducer::new(registry.clone(), queue);
    let status = StatusService::new(registry);
    let app = router(producer, status);

    tracing::info!("HTTP server listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    shutdown.cancel();
    join_workers(handles).await;
    if let Some(consumer) = consumer {
        stop_consumer(consumer).await;
    }
    Ok(())
}

async fn work(args: WorkerArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let Some(redis_url) = args.broker.redis_url.as_deref() else {
        anyhow::bail!("the worker command needs a broker: set REDIS_URL or pass --redis-url");
    };

    let (queue, registry) = connect_redis(redis_url, &args.broker, &args.consumer_id).await?;
    let consumer = start_consumer(queue.clone(), shutdown.clone()).await?;
    let executor = ScanExecutor::from_config(&args.executor.to_config());
    let worker = Arc::new(ScanWorker::new(
        queue.clone(),
        registry,
        executor,
        args.workers.max(1),
    ));

    let handles = worker.start(shutdown.clone());
    spawn_stats_reporter(queue, shutdown.clone());

    shutdown.cancelled().await;
    join_workers(handles).await;
    stop_consumer(consumer).await;
    Ok(())
}

/// Opens one Redis connection shared by the queue and the registry.
async fn connect_redis(
    redis_url: &str,
    broker: &BrokerArgs,
    consumer_id: &str,
) -> anyhow::Result<(Arc<RedisQueue>, Arc<RedisRegistry>)> {
    tracing::info!("Connecting to Redis at {}", redis_url);

    let client = redis::Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;

    let queue = RedisQueue::with_connection(conn.clone(), &broker.queue_name, consumer_id);
    let registry = RedisRegistry::with_connection(conn, &broker.key_prefix);

    Ok((Arc::new(queue), Arc::new(registry)))
}

/// Claims the consumer id, requeues whatever its previous run left in its
/// processing list and starts the heartbeat/reaper task.
async fn start_consumer(
    queue: Arc<RedisQueue>,
    shutdown: CancellationToken,
) -> anyhow::Result<(Arc<RedisQueue>, JoinHandle<()>)> {
    queue.register().await?;

    let recovered = queue.recover().await?;
    if recovered > 0 {
        tracing::info!("Requeued {} unacknowledged tasks of this consumer", recovered);
    }

    let maintenance = queue.clone().spawn_maintenance(shutdown);
    Ok((queue, maintenance))
}

async fn stop_consumer((queue, maintenance): (Arc<RedisQueue>, JoinHandle<()>)) {
    if let Err(e) = maintenance.await {
        tracing::error!("Consumer maintenance task ended abnormally: {}", e);
    }
    if let Err(e) = queue.deregister().await {
        tracing::warn!("Could not release the consumer id: {}", e);
    }
}

fn start_workers(
    args: &ServeArgs,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn ScanRegistry>,
    worker_count: usize,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    if worker_count == 0 {
        tracing::info!("No embedded workers; tasks are left to standalone workers");
        return Vec::new();
    }

    let executor = ScanExecutor::from_config(&args.executor.to_config());
    Arc::new(ScanWorker::new(queue, registry, executor, worker_count)).start(shutdown)
}

fn spawn_stats_reporter(queue: Arc<dyn TaskQueue>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match queue.pending_count().await {
                Ok(pending) => tracing::info!("Queue stats: {} tasks waiting", pending),
                Err(e) => tracing::warn!("Queue stats unavailable: {}", e),
            }
        }
    });
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker task ended abnormally: {}", e);
        }
    }
    tracing::info!("All workers stopped");
}
