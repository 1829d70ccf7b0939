use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use status_watcher::config::LoggingConfig;
use status_watcher::fanout::NotificationFanout;
use status_watcher::plugins::{ChatSender, LogNotifier, NtfyNotifier, PushSender, TelegramClient, TelegramNotifier};
use status_watcher::scheduler::StatusScheduler;
use status_watcher::store::SqliteStore;
use status_watcher::{AppConfig, AppError, FetchOrchestrator, StatusPipeline};

#[derive(Parser)]
#[command(name = "status-watcher", version, about = "Watches application statuses and notifies subscribers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every tracked identifier on the configured schedule
    Run,
    /// Fetch statuses once without touching the store
    Check {
        identifier: String,
        /// Print the whole history instead of the latest entry
        #[arg(long)]
        all: bool,
    },
    /// Run the full pipeline for one identifier, honouring the manual cooldown
    Poll {
        identifier: String,
        #[arg(long)]
        privileged: bool,
    },
    /// Start tracking an identifier without notifying about existing entries
    Track { identifier: String },
    /// Subscribe a chat to an identifier
    Subscribe {
        identifier: String,
        subscriber: String,
        /// Push channel secret for this subscriber
        #[arg(long)]
        secret: Option<String>,
    },
}

struct App {
    store: Arc<SqliteStore>,
    orchestrator: Arc<FetchOrchestrator>,
    pipeline: Arc<StatusPipeline>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging);

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.metrics.port)))
            .install()
            .context("Failed to install metrics exporter")?;
        info!("Metrics exposed on port {}", config.metrics.port);
    }

    let app = build(&config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(app, &config).await,
        Command::Check { identifier, all } => {
            let entries = app
                .orchestrator
                .check(&identifier, all)
                .await
                .map_err(|failure| anyhow::anyhow!("Check failed for {}: {}", identifier, failure))?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(())
        }
        Command::Poll { identifier, privileged } => match app.pipeline.run_manual(&identifier, privileged).await {
            Ok(outcome) => {
                println!(
                    "{}: {} entries, {} new, {} notified",
                    identifier,
                    outcome.record.entries.len(),
                    outcome.new_entries.len(),
                    outcome.report.chat.sent
                );
                Ok(())
            }
            Err(AppError::Cooldown { minutes }) => {
                println!("{} was checked recently, try again in {} min", identifier, minutes);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Track { identifier } => {
            let record = app.pipeline.track(&identifier).await?;
            println!("Tracking {} with {} entries", identifier, record.entries.len());
            Ok(())
        }
        Command::Subscribe {
            identifier,
            subscriber,
            secret,
        } => {
            if app.store.add_subscriber(&subscriber, &identifier).await? {
                println!("Subscribed {} to {}", subscriber, identifier);
            } else {
                println!("{} already follows {}", subscriber, identifier);
            }
            if let Some(secret) = secret {
                app.store.set_push_channel(&subscriber, &secret).await?;
            }
            Ok(())
        }
    }
}

async fn build(config: &AppConfig) -> Result<App> {
    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    store.init().await.context("Failed to run database migrations")?;

    let telegram = match config.notifications.telegram.token {
        Some(_) => Some(TelegramClient::new(&config.notifications.telegram)?),
        None => {
            tracing::warn!("No Telegram token configured, chat messages will only be logged");
            None
        }
    };

    let chat: Arc<dyn ChatSender> = match &telegram {
        Some(client) => Arc::new(TelegramNotifier::new(client.clone())),
        None => Arc::new(LogNotifier),
    };
    let push: Option<Arc<dyn PushSender>> = if config.notifications.push.enabled {
        Some(Arc::new(NtfyNotifier::new(&config.notifications.push)?))
    } else {
        None
    };

    let orchestrator = Arc::new(FetchOrchestrator::from_config(config, telegram)?);
    let fanout = Arc::new(NotificationFanout::new(
        store.clone(),
        chat,
        push,
        &config.notifications.push,
    ));
    let pipeline = Arc::new(StatusPipeline::new(
        orchestrator.clone(),
        store.clone(),
        fanout,
        config.scheduler.clone(),
    ));

    Ok(App {
        store,
        orchestrator,
        pipeline,
    })
}

async fn run(app: App, config: &AppConfig) -> Result<()> {
    info!("Starting status watcher...");

    let mut scheduler = StatusScheduler::new(app.pipeline, config.scheduler.clone()).await?;
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown().await?;
    Ok(())
}

/// Console plus a daily rolling file. The guard must outlive the program.
fn init_tracing(logging: &LoggingConfig) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&logging.directory, &logging.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("status_watcher=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    guard
}
