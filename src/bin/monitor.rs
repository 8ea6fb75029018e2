use anyhow::Context;
use clap::Parser;
use cortex_common::logging::init_logging;
use cortex_common::settings::Settings;
use cortex_monitor::services::AnthropicClient;
use cortex_monitor::MonitorRuntime;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "Cortex monitor daemon", long_about = None)]
struct Args {
    /// Configuration file path (YAML); env vars override
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load_from_path(Some(path))?,
        None => Settings::load()?,
    };
    let _log_guard = init_logging(&settings.logging)?;

    info!(
        "starting cortex monitor on {}:{}",
        settings.monitor.host, settings.monitor.port
    );
    if settings.monitor.registration_token.is_empty() {
        warn!("registration token is empty; agent registration is disabled");
    }

    let model = Arc::new(AnthropicClient::new(settings.llm.clone()));
    let runtime = MonitorRuntime::new(settings, model)
        .await
        .context("failed to initialize monitor")?;

    bootstrap_admin(&runtime).await?;

    runtime.run().await.context("monitor server failed")?;

    info!("monitor stopped");
    Ok(())
}

/// Create the initial admin user when none exists and the operator supplied
/// a password via CORTEX_ADMIN_PASSWORD.
async fn bootstrap_admin(runtime: &MonitorRuntime) -> anyhow::Result<()> {
    let Ok(password) = std::env::var("CORTEX_ADMIN_PASSWORD") else {
        return Ok(());
    };

    let store = &runtime.state.store;
    if !store.list_users().await?.is_empty() {
        return Ok(());
    }

    let hash = cortex_monitor::auth::hash_password(&password)?;
    store
        .create_user("admin", "admin@localhost", &hash, "admin")
        .await?;
    info!("bootstrap admin user created");
    Ok(())
}
