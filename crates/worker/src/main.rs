use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use geonotify_core::clock::{Clock, SystemClock};
use geonotify_core::jobs::JobKind;
use geonotify_events::ChannelSenders;
use geonotify_worker::jobs::scheduler;
use geonotify_worker::{Engine, PgStore, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "geonotify-worker", about = "Geo-targeted notification engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dispatch every due notification.
    ProcessDueNotifications {
        /// Run the pass here and now instead of enqueueing it.
        #[arg(long)]
        immediate: bool,
    },
    /// Expire overdue notifications and purge old records.
    CleanupNotifications {
        /// Run the pass here and now instead of enqueueing it.
        #[arg(long)]
        immediate: bool,
    },
    /// Run the scheduled passes and the job queue consumer until stopped.
    Run,
    /// Print statistics as JSON.
    Stats {
        /// Only notifications created in the last N hours.
        #[arg(long)]
        since_hours: Option<i64>,
        /// Also print the eligible recipient count for this notification.
        #[arg(long)]
        notification: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Database ---
    let pool = geonotify_db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    geonotify_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    geonotify_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Engine::new(
        config,
        Arc::new(PgStore::new(pool)),
        ChannelSenders::from_env(),
        clock,
    );

    match cli.command {
        Command::ProcessDueNotifications { immediate } => {
            run_or_enqueue(&engine, JobKind::ProcessDueNotifications, immediate).await
        }
        Command::CleanupNotifications { immediate } => {
            run_or_enqueue(&engine, JobKind::CleanupNotifications, immediate).await
        }
        Command::Run => run_daemon(engine).await,
        Command::Stats {
            since_hours,
            notification,
        } => print_stats(&engine, since_hours, notification).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "geonotify_worker=debug,geonotify_events=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_or_enqueue(engine: &Engine, kind: JobKind, immediate: bool) -> anyhow::Result<()> {
    if immediate {
        let (report, attempts) = engine
            .runner
            .run(kind)
            .await
            .with_context(|| format!("{kind} failed"))?;
        tracing::info!(job = %kind, attempts, "Immediate run finished");
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let job = engine
        .store
        .enqueue_job(kind, engine.clock.now())
        .await
        .with_context(|| format!("Failed to enqueue {kind}"))?;
    tracing::info!(job_id = job.id, job = %kind, "Job enqueued");
    Ok(())
}

async fn run_daemon(engine: Engine) -> anyhow::Result<()> {
    let cancel = engine.shutdown_token();
    let config = engine.config().clone();

    let process = tokio::spawn(scheduler::run_every(
        JobKind::ProcessDueNotifications,
        Arc::clone(&engine.runner),
        config.process_interval,
        cancel.clone(),
    ));
    let cleanup = tokio::spawn(scheduler::run_every(
        JobKind::CleanupNotifications,
        Arc::clone(&engine.runner),
        config.cleanup_interval,
        cancel.clone(),
    ));
    let queue = tokio::spawn(engine.queue_consumer().run());
    tracing::info!("Worker running");

    shutdown_signal().await;
    cancel.cancel();

    for (name, handle) in [("process", process), ("cleanup", cleanup), ("queue", queue)] {
        if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
            tracing::warn!(task = name, "Task did not stop in time");
        }
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn print_stats(
    engine: &Engine,
    since_hours: Option<i64>,
    notification: Option<i64>,
) -> anyhow::Result<()> {
    let from = since_hours.map(|h| engine.clock.now() - chrono::Duration::hours(h));
    let snapshot = engine
        .stats
        .snapshot(from, None)
        .await
        .context("Failed to read statistics")?;

    let mut out = serde_json::to_value(&snapshot)?;
    if let Some(id) = notification {
        let eligible = engine
            .stats
            .eligible_recipient_count(id)
            .await
            .with_context(|| format!("Failed to count recipients for notification {id}"))?;
        out["eligible_recipients"] = serde_json::json!({ "notification_id": id, "count": eligible });
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
