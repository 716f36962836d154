use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, LogFormat};
use crate::ports::LedgerStore;
use crate::services::worker::sweep_due_retries;
use crate::services::{EscrowLedger, EventEmitter, ProcessOutcome, TransactionOrchestrator, WebhookReconciler};

#[derive(Parser)]
#[command(name = "escrow-core")]
#[command(about = "Escrow Core - transaction processing and webhook reconciliation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and background workers (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Retry scheduling commands
    #[command(subcommand)]
    Retries(RetryCommands),

    /// Webhook event commands
    #[command(subcommand)]
    Webhooks(WebhookCommands),

    /// Escrow ledger commands
    #[command(subcommand)]
    Escrow(EscrowCommands),

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum RetryCommands {
    /// Re-submit every transaction whose retry is due now
    RunDue {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum WebhookCommands {
    /// Process a stored webhook event again
    Replay {
        #[arg(value_name = "EVENT_ID")]
        event_id: String,
    },
}

#[derive(Subcommand)]
pub enum EscrowCommands {
    /// Recompute an offering's balance from its entries, repairing drift
    Verify {
        #[arg(value_name = "OFFERING_ID")]
        offering_id: Uuid,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set to run migrations"))?;

    let pool = crate::db::create_pool(database_url).await?;
    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_retries_run_due(
    store: Arc<dyn LedgerStore>,
    emitter: EventEmitter,
    config: &Config,
    limit: i64,
) -> anyhow::Result<()> {
    let orchestrator = TransactionOrchestrator::new(store, emitter, config.compliance.clone());
    let report = sweep_due_retries(&orchestrator, chrono::Utc::now(), limit).await?;

    println!(
        "✓ {} due, {} retried, {} skipped",
        report.due, report.retried, report.failed
    );
    Ok(())
}

pub async fn handle_webhook_replay(
    store: Arc<dyn LedgerStore>,
    emitter: EventEmitter,
    event_id: &str,
) -> anyhow::Result<()> {
    let reconciler = WebhookReconciler::new(store, emitter);

    match reconciler.process(event_id).await? {
        ProcessOutcome::Processed => println!("✓ Webhook event {} processed", event_id),
        ProcessOutcome::AlreadyProcessed => println!("Webhook event {} was already processed", event_id),
    }
    Ok(())
}

pub async fn handle_escrow_verify(store: Arc<dyn LedgerStore>, offering_id: Uuid) -> anyhow::Result<()> {
    let ledger = EscrowLedger::new(store);
    let account = ledger.get_by_offering(offering_id).await?;
    let check = ledger.recompute_balance(account.id).await?;

    println!("Escrow account {} (offering {})", check.account.id, offering_id);
    println!("  Entries:          {}", check.entry_count);
    println!("  Cached balance:   {}", check.cached_balance);
    println!("  Computed balance: {}", check.computed_balance);
    if check.repaired {
        println!("⚠️  Balance drift repaired");
    } else {
        println!("✓ Balance matches entry log");
    }
    Ok(())
}

pub fn handle_config(config: &Config) -> anyhow::Result<()> {
    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(unset, in-memory store)".to_string())
    );
    println!("  Webhook Secret: {}", if config.webhook_secret.is_empty() { "(unset)" } else { "****" });
    println!("  Allowed IPs: {}", config.allowed_ips);
    println!("  Trusted Proxy Depth: {}", config.trusted_proxy_depth);
    println!("  Single Transaction Limit: {}", config.compliance.single_transaction_limit);
    println!("  Daily Limit: {}", config.compliance.daily_limit);
    println!("  Approval Threshold: {}", config.compliance.approval_threshold);
    println!("  Velocity Max Transactions: {}", config.compliance.velocity_max_transactions);
    println!("  Retry Poll Interval: {}s", config.retry_poll_secs);
    println!("  Webhook Max Attempts: {}", config.webhook_max_attempts);
    println!(
        "  Log Format: {}",
        match config.log_format {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    );

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let user = &url[slash_pos + 2..colon_pos];
                return format!("{}{}:****{}", &url[..slash_pos + 2], user, &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_database_password() {
        assert_eq!(
            mask_password("postgres://ledger:s3cret@db:5432/escrow"),
            "postgres://ledger:****@db:5432/escrow"
        );
        assert_eq!(mask_password("postgres://db/escrow"), "postgres://db/escrow");
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["escrow-core", "webhooks", "replay", "evt_123"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Webhooks(WebhookCommands::Replay { ref event_id })) if event_id == "evt_123"
        ));

        let cli = Cli::try_parse_from(["escrow-core"]).unwrap();
        assert!(cli.command.is_none());
    }
}
