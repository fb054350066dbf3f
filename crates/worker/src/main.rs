//! `renderpool-worker` -- render backend dispatcher daemon.
//!
//! Builds the slot pool from configuration and runs the dispatcher with
//! auto-generation, logging every result. Stops on Ctrl-C.
//!
//! See [`WorkerConfig::from_env`] for the environment variables read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use renderpool_backend::api::BackendApi;
use renderpool_backend::engine::{CompletionResult, RenderEngine};
use renderpool_backend::shared_pool;
use renderpool_core::{JobDescription, RenderRequest, SlotPool};
use renderpool_worker::config::WorkerConfig;
use renderpool_worker::dispatcher::{Dispatcher, HostError, RenderHost};
use renderpool_worker::queue::{JobMode, TargetId};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headless host: numbers placeholders and logs results.
struct LoggingHost {
    next_target: AtomicU64,
    prompt: String,
}

impl RenderHost for LoggingHost {
    fn build_job(&self, _mode: JobMode, _target: TargetId) -> Result<JobDescription, HostError> {
        Ok(JobDescription::new(RenderRequest::new(&self.prompt))?)
    }

    fn create_placeholder(&self) -> TargetId {
        self.next_target.fetch_add(1, Ordering::Relaxed)
    }

    fn default_job(&self, target: TargetId) -> Result<JobDescription, HostError> {
        self.build_job(JobMode::Generate, target)
    }

    fn on_complete(&self, target: TargetId, mode: JobMode, result: CompletionResult) {
        match &result.outcome {
            Ok(image) => tracing::info!(
                target_id = target,
                ?mode,
                slot_id = result.slot_id,
                width = image.width(),
                height = image.height(),
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Image ready",
            ),
            Err(_) => tracing::warn!(
                target_id = target,
                ?mode,
                message = %result.user_message().unwrap_or_default(),
                "Image failed",
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderpool_worker=info,renderpool_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;

    let mut pool = SlotPool::new();
    for backend in config.backends.iter().cloned() {
        pool.add_slot(backend.into())
            .context("Failed to register backend slot")?;
    }
    tracing::info!(slots = pool.len(), "Backend slot pool ready");

    let api = BackendApi::with_timeout(config.request_timeout)
        .context("Failed to build HTTP client")?;
    let engine = RenderEngine::new(shared_pool(pool), Arc::new(api));
    let host = Arc::new(LoggingHost {
        next_target: AtomicU64::new(0),
        prompt: config.default_prompt.clone(),
    });

    let dispatcher = Dispatcher::new(engine, host).with_tick_interval(config.tick_interval);
    dispatcher.set_auto_generate(config.auto_generate);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.cancel(),
            Err(e) => tracing::error!(
                error = %e,
                "Failed to listen for Ctrl-C, dispatcher keeps running",
            ),
        }
    });

    dispatcher.run(cancel).await;
    Ok(())
}
