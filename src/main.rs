//! Entry point: loads configuration, assembles the pipeline, runs the
//! bulk snapshot (if enabled), then tails the change feed in the
//! background while serving `/health` and `/ready` until a shutdown
//! signal arrives.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use cdc_pipeline::{context::Context, error::PipelineError, health};
use cdc_shutdown::ShutdownCoordinator;
use cdc_task::{labels::TaskLabels, TaskManager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period given to in-flight work once a shutdown signal arrives.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cdc_pipeline=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, kind = ?err.kind(), "pipeline exited with a fatal error");
        std::process::exit(1);
    }

    Ok(())
}

async fn run() -> Result<(), PipelineError> {
    let config_path = std::env::var("CONFIG_FILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("config.yaml"));
    let config = cdc_config::Config::load(Some(&config_path))?;

    let ctx = Context::assemble(config).await?;

    let health_state = health::HealthState::new(ctx.breaker.clone(), ctx.source.clone());
    let health_router = health::router(health_state);
    let health_addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.pipeline.health_port));
    let listener = tokio::net::TcpListener::bind(health_addr).await?;
    tracing::info!(addr = %health_addr, "health surface listening");

    let processed = cdc_snapshot::BulkSnapshotLoader::new(ctx.source.clone(), ctx.sink.clone())
        .run(ctx.config.pipeline.snapshot_enabled, ctx.config.source.batch_size)
        .await?;
    tracing::info!(processed, "bulk snapshot phase complete");

    let processor = std::sync::Arc::new(cdc_changefeed::ChangeFeedProcessor::new(
        ctx.source.clone(),
        ctx.sink.clone(),
        ctx.cursor_store.clone(),
        ctx.breaker.clone(),
    ));

    let mut tasks = TaskManager::new();
    let task_processor = processor.clone();
    let task_labels = TaskLabels::new("change_feed", "tail", "mongodb");
    let process_labels = tasks.process_labels();
    let join_handle = tokio::spawn(async move {
        if let Err(err) = task_processor.run().await {
            tracing::error!(error = %err, "change feed processor exited");
        }
        TaskManager::no_task_cleaner(process_labels, task_labels)
    });
    tasks.register(join_handle, &TaskLabels::new("change_feed", "tail", "mongodb"));

    let coordinator = std::sync::Arc::new(ShutdownCoordinator::new(ctx.sink.clone()));
    let stop_processor = processor.clone();
    coordinator.register("stop-change-feed", move || async move {
        stop_processor.request_stop();
        Ok(())
    });

    let server_coordinator = coordinator.clone();
    let server = axum::serve(listener, health_router.into_make_service());

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                tracing::error!(error = %err, "health server exited unexpectedly");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    let report = server_coordinator.shutdown(SHUTDOWN_DEADLINE).await;
    if !report.all_completed {
        tracing::warn!("shutdown deadline elapsed before every action completed");
    }
    tasks.join().await;

    Ok(())
}
