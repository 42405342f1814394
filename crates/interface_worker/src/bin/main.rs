//! Inventory Worker Binary
//!
//! # Usage
//!
//! ```bash
//! # Run the scheduled jobs until Ctrl+C / SIGTERM
//! inventory-worker run
//!
//! # One reconciliation pass, every tenant or one
//! inventory-worker reconcile --mode report
//! inventory-worker reconcile --tenant TEN-... --mode repair
//!
//! # Seed a tenant's balance snapshot from its ledger
//! inventory-worker bootstrap --tenant TEN-...
//! ```
//!
//! # Environment Variables
//!
//! * `WORKER_DATABASE_URL` (or `DATABASE_URL`) - PostgreSQL connection string
//! * `WORKER_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! * `WORKER_LOG_FORMAT` - pretty or json (default: pretty)
//! * `WORKER_RECONCILE_MODE` - report, repair or strict (default: report)
//! * `WORKER_RECONCILE_INTERVAL_SECS`, `WORKER_RESERVATION_EXPIRY_INTERVAL_SECS`,
//!   `WORKER_IDEMPOTENCY_CLEANUP_INTERVAL_SECS` - job intervals
//! * `WORKER_IDEMPOTENCY_TTL_SECS` - age of a stuck idempotency key (default: 900)

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use core_kernel::{Clock, SystemClock, TenantId};
use domain_inventory::{BalanceReconciler, ReconcileMode, ReconciliationReport};
use infra_db::{create_pool, PostgresInventoryStore};
use interface_worker::{build_scheduler, init_tracing, WorkerConfig};

#[derive(Parser)]
#[command(
    name = "inventory-worker",
    about = "Inventory ledger worker: reconciliation, reservation expiry and idempotency cleanup",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled jobs until interrupted
    Run,

    /// Run one reconciliation pass and print the report
    Reconcile {
        /// Tenant to reconcile; every tenant when omitted
        #[arg(long)]
        tenant: Option<TenantId>,

        /// report, repair or strict; defaults to WORKER_RECONCILE_MODE
        #[arg(long)]
        mode: Option<ReconcileMode>,

        /// In strict mode, repair before checking; defaults to WORKER_STRICT_REPAIR
        #[arg(long)]
        repair: bool,
    },

    /// Rebuild a tenant's balance snapshot from the ledger
    Bootstrap {
        #[arg(long)]
        tenant: TenantId,

        /// Recorded on every repair row
        #[arg(long, default_value = "bootstrap")]
        actor: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    init_tracing(&config.log_level, config.log_format).context("failed to install tracing subscriber")?;

    let pool = create_pool(config.database())
        .await
        .context("failed to connect to the database")?;
    let store = Arc::new(PostgresInventoryStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Run => run(store, clock, &config).await,
        Command::Reconcile { tenant, mode, repair } => {
            let mut config = config;
            config.strict_repair |= repair;
            reconcile(store, clock, &config, tenant, mode).await
        }
        Command::Bootstrap { tenant, actor } => {
            let reconciler = BalanceReconciler::new(store, clock);
            let report = reconciler.bootstrap_balances(tenant, &actor).await?;
            print_report(&report)
        }
    }
}

async fn run(store: Arc<PostgresInventoryStore>, clock: Arc<dyn Clock>, config: &WorkerConfig) -> anyhow::Result<()> {
    let mut scheduler = build_scheduler(store, clock, config)?;
    tracing::info!(jobs = ?scheduler.job_names(), "Starting inventory worker");
    scheduler.start()?;

    shutdown_signal().await;

    scheduler.shutdown().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

async fn reconcile(
    store: Arc<PostgresInventoryStore>,
    clock: Arc<dyn Clock>,
    config: &WorkerConfig,
    tenant: Option<TenantId>,
    mode: Option<ReconcileMode>,
) -> anyhow::Result<()> {
    let options = config.reconcile_options(mode, "cli")?;
    let reconciler = BalanceReconciler::new(store, clock);

    if let Some(tenant_id) = tenant {
        let report = reconciler.reconcile(tenant_id, &options).await?;
        return print_report(&report);
    }

    let mut failed = 0usize;
    for (tenant_id, result) in reconciler.reconcile_all(&options).await? {
        match result {
            Ok(report) => print_report(&report)?,
            Err(err) => {
                eprintln!("{}: {} ({})", tenant_id, err, err.code());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("reconciliation failed for {} tenant(s)", failed);
    }
    Ok(())
}

fn print_report(report: &ReconciliationReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing in-flight jobs");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, finishing in-flight jobs");
        }
    }
}
