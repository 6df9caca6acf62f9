use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use taskgate::{
    CompletionLogExecutor, DualAdmissionController, HttpApi, IntakeService, Stores,
    TaskgateRedisClient, WorkerPool, cancel_on_signal,
    config::{Backend, Config},
    logger_init,
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    logger_init(&config.logger_config())?;

    let burst = config.burst_window()?;
    let sustained = config.sustained_window()?;

    let stores = match config.backend {
        Backend::Redis => {
            let client = redis::Client::open(config.redis_url())?;
            let client = TaskgateRedisClient::from_client(
                client,
                config.redis_connections,
                Some(config.redis_timeout()),
            )
            .await?;

            tracing::info!(url = %config.redis_url(), connections = config.redis_connections, "redis.connected");

            Stores::redis(client, Some(config.key_prefix()?), config.queue_name()?)
        }
        Backend::Memory => {
            tracing::warn!("memory backend: rate counters and queued tasks are lost on restart");

            Stores::local()
        }
    };
    let window_cleanup = stores.run_cleanup_loop(CLEANUP_INTERVAL);

    let admission = Arc::new(DualAdmissionController::new(
        stores.windows.clone(),
        burst,
        sustained,
    ));
    let intake = Arc::new(IntakeService::new(admission, stores.queue.clone()));

    let executor = Arc::new(CompletionLogExecutor::new(config.completion_log.clone()));
    let dedupe_cleanup = executor.run_cleanup_loop(CLEANUP_INTERVAL);
    let cancel = CancellationToken::new();
    let pool = WorkerPool::spawn(
        stores.queue.clone(),
        executor,
        config.worker_options(),
        cancel.clone(),
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(addr = %config.listen_addr(), workers = pool.len(), "server.listening");

    axum::serve(listener, HttpApi::new(intake).router())
        .with_graceful_shutdown(cancel_on_signal(tokio::signal::ctrl_c(), cancel))
        .await?;

    tracing::info!("server.stopped, draining workers");
    pool.shutdown().await;

    dedupe_cleanup.abort();
    if let Some(window_cleanup) = window_cleanup {
        window_cleanup.abort();
    }

    Ok(())
}
