use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::rest::{create_router, AppState};
use crate::runner::codegen::PythonRuntime;
use crate::runner::{HandlerContext, TaskRunner};
use crate::shared::inference::InferenceClient;
use crate::shared::process::ProcessRunner;
use crate::shared::{ServiceConfig, Workspace};

/// Wires the runner from configuration.
pub fn build_state(config: &ServiceConfig) -> Result<AppState> {
    let model = InferenceClient::new(
        &config.inference_url,
        config.inference_api_key.as_deref(),
        &config.inference_model,
        &config.transcription_model,
        config.inference_timeout(),
    )
    .context("Failed to build inference client")?;

    let http = reqwest::Client::builder()
        .timeout(config.inference_timeout())
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let processes = ProcessRunner::new(config.process_timeout());
    let ctx = HandlerContext {
        workspace: Workspace::new(&config.data_dir),
        model: Arc::new(model),
        http,
        processes: processes.clone(),
        public_prefix: config.public_prefix.clone(),
    };
    let runner = TaskRunner::new(
        ctx,
        Arc::new(PythonRuntime::new(processes)),
        config.user_email.clone(),
        config.codegen_fallback,
    );

    Ok(AppState {
        runner,
        public_prefix: config.public_prefix.clone(),
    })
}

pub async fn run_rest_server(config: ServiceConfig) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        public_prefix = %config.public_prefix,
        model = %config.inference_model,
        codegen_fallback = config.codegen_fallback,
        "Starting taskdesk API"
    );
    if config.inference_api_key.is_none() {
        tracing::warn!("No inference API key configured; classification fallback and code generation will fail");
    }

    let state = build_state(&config)?;
    state
        .runner
        .workspace()
        .ensure_root()
        .await
        .with_context(|| format!("Cannot create data dir {}", config.data_dir.display()))?;

    let app = create_router(Arc::new(state));

    let bind_addr = config.bind_addr();
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    info!("Ready to accept requests on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Taskdesk API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
