use leaseflow::api;
use leaseflow::config::{self, StoreBackend};
use leaseflow::db;
use leaseflow::jobs::{JobQueue, JobStore, MemoryStore, PgJobStore, Reaper, Worker};

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

mod handlers;
use handlers::build_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    leaseflow::telemetry::init();

    let cfg = config::Config::from_env()?;

    tracing::info!(
        worker_id = %cfg.worker_id,
        backend = ?cfg.backend,
        concurrency = cfg.worker_concurrency,
        lease_seconds = cfg.lease_seconds,
        reap_interval_ms = cfg.reap_interval_ms,
        reap_batch_size = cfg.reap_batch_size,
        poll_interval_ms = cfg.poll_interval_ms,
        admin_addr = cfg.admin_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        "leaseflow worker starting"
    );

    let store: Arc<dyn JobStore> = match cfg.backend {
        StoreBackend::Postgres => {
            let database_url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;
            let pool = db::make_pool(database_url).await?;
            if cfg.migrate_on_startup {
                db::run_migrations(&pool).await?;
            }
            Arc::new(PgJobStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; jobs do not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let queue = JobQueue::new(store, cfg.backoff.clone())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    // ---- Admin API ----
    if let Some(addr) = cfg.admin_addr.clone() {
        let app = api::router(api::ApiState {
            queue: queue.clone(),
            default_max_attempts: cfg.default_max_attempts,
        });
        let mut shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "admin api listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        });
    }

    // ---- Reaper ----
    {
        let reaper = Reaper::new(queue.clone(), cfg.lease_timeout(), cfg.reap_interval())
            .batch_size(cfg.reap_batch_size);
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            reaper.run(shutdown).await;
            Ok::<(), anyhow::Error>(())
        });
    }

    // ---- Worker loops ----
    // Handlers give up before the lease does, so a slow job is failed by its
    // own worker rather than reaped underneath it.
    let handler = build_handler(cfg.lease_timeout().mul_f64(0.9));
    for n in 0..cfg.worker_concurrency {
        let worker_id = if cfg.worker_concurrency == 1 {
            cfg.worker_id.clone()
        } else {
            format!("{}-{}", cfg.worker_id, n)
        };
        let worker = Worker::new(queue.clone(), handler.clone(), worker_id)
            .poll_interval(cfg.poll_interval());
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            worker.run(shutdown).await?;
            Ok::<(), anyhow::Error>(())
        });
    }

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
        Some(joined) = tasks.join_next() => {
            // a task ending on its own before shutdown is a failure
            match joined {
                Ok(Ok(())) => Err(anyhow::anyhow!("background task exited unexpectedly")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e.into()),
            }
        }
    };

    let _ = shutdown_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Err(e)) = joined {
            tracing::error!(error = %e, "task failed during shutdown");
        }
    }

    result
}
