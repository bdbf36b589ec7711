use anyhow::Result;

#[path = "../api/mod.rs"]
mod api;
#[path = "../runner/mod.rs"]
mod runner;
#[path = "../shared/mod.rs"]
mod shared;

#[tokio::main]
async fn main() -> Result<()> {
    let config = shared::ServiceConfig::load()?;

    // Console logging still works when the log dir is not writable
    if let Err(e) = shared::logging::init_service_logging(&config.log_dir, "taskdesk_api") {
        eprintln!("Logging setup failed: {e}");
    }

    api::rest::api::run_rest_server(config).await
}
