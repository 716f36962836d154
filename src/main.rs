use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escrow_core::adapters::{MemoryLedgerStore, PostgresLedgerStore};
use escrow_core::cli::{self, Cli, Commands, DbCommands, EscrowCommands, RetryCommands, WebhookCommands};
use escrow_core::config::{Config, LogFormat};
use escrow_core::ports::LedgerStore;
use escrow_core::services::{
    run_retry_sweeper, run_webhook_redelivery, BroadcastListener, EventEmitter, TracingListener,
};
use escrow_core::{create_app, db, AppState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::from_env());

    let config = Config::from_env()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Retries(RetryCommands::RunDue { limit }) => {
            let store = open_store(&config).await?;
            cli::handle_retries_run_due(store, emitter(None), &config, limit).await
        }
        Commands::Webhooks(WebhookCommands::Replay { event_id }) => {
            let store = open_store(&config).await?;
            cli::handle_webhook_replay(store, emitter(None), &event_id).await
        }
        Commands::Escrow(EscrowCommands::Verify { offering_id }) => {
            let store = open_store(&config).await?;
            cli::handle_escrow_verify(store, offering_id).await
        }
        Commands::Config => cli::handle_config(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Using Postgres ledger store");
            Ok(Arc::new(PostgresLedgerStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; using the in-memory ledger store");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
    }
}

fn emitter(events: Option<broadcast::Sender<escrow_core::domain::TransactionEvent>>) -> EventEmitter {
    let emitter = EventEmitter::new().with_listener(Arc::new(TracingListener));
    match events {
        Some(tx) => emitter.with_listener(Arc::new(BroadcastListener::new(tx))),
        None => emitter,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let state = AppState::new(store, emitter(Some(events_tx)), config.clone());

    tokio::spawn(run_retry_sweeper(state.orchestrator.clone(), config.retry_poll_secs));
    tokio::spawn(run_webhook_redelivery(
        state.reconciler.clone(),
        config.webhook_max_attempts,
        config.retry_poll_secs,
    ));

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
