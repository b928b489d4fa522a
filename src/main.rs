use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use land_import::config::Config;
use land_import::database::Database;
use land_import::events::{
    BroadcastEventSink, CompositeEventSink, EventSink, WebhookEventSink,
};
use land_import::pipeline::{
    IntakeService, JsonlFileSink, ProcessingEngine, RecordSink, Transformer, ValidationEngine,
    ValidationService,
};
use land_import::registry::{InMemoryJobRegistry, JobRegistry};
use land_import::services::{ImportJobService, RetentionService};
use land_import::storage::ImportFileStorage;
use land_import::web::{AppState, WebServer};

#[derive(Parser)]
#[command(name = "land-import")]
#[command(about = "Bulk CSV import pipeline for land-registry datasets")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the web server host
    #[arg(long)]
    host: Option<String>,

    /// Override the web server port
    #[arg(long)]
    port: Option<u16>,

    /// Override the database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("land_import={0},tower_http={0}", cli.log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(config_path) = &cli.config {
        std::env::set_var("CONFIG_FILE", config_path);
    }
    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Starting land-import");

    let database = Arc::new(Database::new(&config.database).await?);
    database.migrate().await?;
    info!("Database ready at {}", config.database.url);

    let storage = ImportFileStorage::new(config.storage.upload_path.clone());
    storage.ensure_storage_dirs().await?;

    let registry: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
    let sink: Arc<dyn RecordSink> =
        Arc::new(JsonlFileSink::new(config.storage.output_path.clone()));

    let broadcast = Arc::new(BroadcastEventSink::new());
    let events: Arc<dyn EventSink> = match &config.import.event_webhook_url {
        Some(url) => Arc::new(CompositeEventSink::new(vec![
            broadcast.clone(),
            Arc::new(WebhookEventSink::new(url.clone())),
        ])),
        None => broadcast.clone(),
    };

    let intake = Arc::new(IntakeService::new(
        Arc::clone(&registry),
        storage.clone(),
        Arc::clone(&database),
        Arc::clone(&events),
    ));
    let validation = Arc::new(ValidationService::new(
        Arc::clone(&registry),
        storage.clone(),
        Arc::clone(&events),
        Arc::new(ValidationEngine::new()),
    ));
    let processing = Arc::new(ProcessingEngine::new(
        Arc::clone(&registry),
        storage.clone(),
        Arc::clone(&sink),
        Arc::clone(&events),
        Arc::new(Transformer::new()),
        config.import.max_concurrent_jobs,
    ));
    let jobs = Arc::new(ImportJobService::new(
        Arc::clone(&registry),
        storage.clone(),
        Arc::clone(&sink),
        Arc::clone(&processing),
        Arc::clone(&events),
    ));

    let retention = RetentionService::new(Arc::clone(&jobs), &config.retention)?;
    tokio::spawn(async move {
        retention.start().await;
    });

    let state = AppState {
        config: config.clone(),
        database,
        intake,
        validation,
        processing,
        jobs,
    };

    let server = WebServer::new(state)?;
    if let Err(e) = server.serve().await {
        error!("Web server exited: {}", e);
        return Err(e);
    }

    Ok(())
}
