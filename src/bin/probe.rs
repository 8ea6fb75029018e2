use anyhow::Context;
use clap::Parser;
use cortex_common::logging::init_logging;
use cortex_common::queue::LocalQueue;
use cortex_common::queue_sender::QueueSender;
use cortex_common::settings::Settings;
use cortex_common::IntentRecorder;
use cortex_probe::api::{build_router, ProbeState};
use cortex_probe::{AutoFixer, ProbeBroadcaster, ProbeExecutor, ProbeScheduler, SysinfoCollector};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Cortex probe daemon", long_about = None)]
struct Args {
    /// Configuration file path (YAML); env vars override
    #[arg(short, long)]
    config: Option<String>,

    /// Run one inspection and exit instead of serving
    #[arg(long)]
    once: bool,
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

    info!("starting cortex probe, agent: {}", settings.agent.id);

    let queue = Arc::new(
        LocalQueue::open(
            &settings.probe.queue_path,
            settings.probe.queue_max_retries,
            settings.probe.queue_capacity,
        )
        .await
        .context("failed to open local queue")?,
    );
    let intents = Arc::new(
        IntentRecorder::open(&settings.intent_engine)
            .await
            .context("failed to open intent store")?,
    );

    let events = Arc::new(ProbeBroadcaster::new());
    let executor = Arc::new(ProbeExecutor::new(
        settings.clone(),
        Arc::new(SysinfoCollector),
        AutoFixer::with_default_handlers(),
        Arc::clone(&intents),
        Arc::clone(&queue),
    ));

    if args.once {
        let report = executor.execute().await?;
        executor.ship(&report).await?;
        let sender = Arc::new(QueueSender::new(
            Arc::clone(&queue),
            Duration::from_secs(settings.probe.queue_send_interval_seconds),
            settings.probe.queue_batch_size,
        ));
        sender.flush().await?;
        info!("single inspection completed, status: {}", report.status);
        return Ok(());
    }

    let scheduler = Arc::new(ProbeScheduler::new(
        Arc::clone(&executor),
        Arc::clone(&events),
        &settings.probe.schedule,
        Duration::from_secs(settings.probe.timeout_seconds),
    )?);
    scheduler.start().await;

    let sender = Arc::new(QueueSender::new(
        Arc::clone(&queue),
        Duration::from_secs(settings.probe.queue_send_interval_seconds),
        settings.probe.queue_batch_size,
    ));
    sender.start().await;

    let state = Arc::new(ProbeState {
        settings: settings.clone(),
        scheduler: Arc::clone(&scheduler),
        events,
        queue: Arc::clone(&queue),
    });

    let addr: SocketAddr = format!("{}:{}", settings.probe.host, settings.probe.port)
        .parse()
        .context("invalid probe listen address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("probe listening on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Orderly teardown: stop the loops, then push out what is still queued
    scheduler.stop().await;
    sender.stop().await;
    sender.flush().await?;
    queue
        .cleanup_older_than(settings.probe.report_retention_days as i64)
        .await?;

    info!("probe stopped");
    Ok(())
}
