//! Payout Engine
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐
//! │   HTTP   │───▶│ Coordinator │───▶│ Gateway  │
//! │   API    │    │ (persist 1st)│   │ (B2C)    │
//! └──────────┘    └─────────────┘    └──────────┘
//!       ▲                ▲                 │ webhook
//!       │         ┌──────┴──────┐    ┌─────▼──────┐    ┌──────────────┐
//!       │         │    Retry    │    │ Correlator │───▶│ Charge worker │
//!       │         │  Scheduler  │    └────────────┘    │  (wallets)    │
//!       │         └─────────────┘                      └──────────────┘
//! ```
//!
//! Usage:
//!   payout_engine [--env dev] [--port 8080] [--retry-once]

use std::sync::Arc;

use anyhow::Context;
use payout_engine::audit::{AuditSink, TracingAuditSink};
use payout_engine::callback::{
    CallbackCorrelator, CallbackRepository, InMemoryCallbackRepository, PgCallbackRepository,
};
use payout_engine::config::AppConfig;
use payout_engine::db::Database;
use payout_engine::disbursement::{
    DisbursementCoordinator, DisbursementRepository, InMemoryDisbursementRepository,
    PgDisbursementRepository,
};
use payout_engine::gateway::{self, AppState};
use payout_engine::provider::{
    CredentialProvider, HttpPayoutProvider, PgCredentialProvider, StaticCredentialProvider,
};
use payout_engine::retry::{RetryPolicy, RetryScheduler, RetryWorker};
use payout_engine::settlement::{ChargeWorker, settlement_channel};
use payout_engine::wallet::{
    ChargeReconciler, InMemoryWalletRepository, PgWalletRepository, WalletRepository,
};

const SETTLEMENT_CHANNEL_SIZE: usize = 1024;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

/// Run one retry batch and exit instead of serving (cron mode)
fn use_retry_once_mode() -> bool {
    std::env::args().any(|a| a == "--retry-once")
}

struct Stores {
    disbursements: Arc<dyn DisbursementRepository>,
    callbacks: Arc<dyn CallbackRepository>,
    wallets: Arc<dyn WalletRepository>,
    credentials: Arc<dyn CredentialProvider>,
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            db.migrate().await.context("failed to run migrations")?;
            let pool = db.pool().clone();
            tracing::info!("Using PostgreSQL stores");
            Ok(Stores {
                disbursements: Arc::new(PgDisbursementRepository::new(pool.clone())),
                callbacks: Arc::new(PgCallbackRepository::new(pool.clone())),
                wallets: Arc::new(PgWalletRepository::new(pool.clone())),
                credentials: Arc::new(PgCredentialProvider::new(pool)),
            })
        }
        None => {
            tracing::warn!("postgres_url not set, using in-memory stores (state is lost on exit)");
            Ok(Stores {
                disbursements: Arc::new(InMemoryDisbursementRepository::new()),
                callbacks: Arc::new(InMemoryCallbackRepository::new()),
                wallets: Arc::new(InMemoryWalletRepository::new()),
                credentials: Arc::new(StaticCredentialProvider::new(config.partners.clone())),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env).context("failed to load config")?;
    if let Some(port) = get_port_override() {
        app_config.gateway.port = port;
    }
    let _log_guard = payout_engine::logging::init_logging(&app_config);

    tracing::info!(
        build = env!("PAYOUT_ENGINE_BUILD"),
        "Starting payout engine in {} mode",
        env
    );

    let stores = open_stores(&app_config).await?;
    let provider = Arc::new(
        HttpPayoutProvider::new(app_config.provider.clone())
            .context("failed to build gateway client")?,
    );
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let policy = Arc::new(RetryPolicy::from_config(&app_config.retry));

    let coordinator = Arc::new(DisbursementCoordinator::new(
        stores.disbursements.clone(),
        provider,
        stores.credentials,
        policy.clone(),
        audit.clone(),
        app_config.retry.max_retries,
    ));

    let (settlement_tx, settlement_rx) = settlement_channel(SETTLEMENT_CHANNEL_SIZE);
    let correlator = Arc::new(CallbackCorrelator::new(
        stores.callbacks,
        stores.disbursements.clone(),
        policy,
        settlement_tx,
        audit.clone(),
        app_config.correlation.clone(),
    ));
    let reconciler = Arc::new(ChargeReconciler::new(
        stores.wallets,
        stores.disbursements,
        audit,
    ));
    let scheduler = Arc::new(
        RetryScheduler::new(coordinator.clone(), app_config.retry.clone())
            .with_reconciler(reconciler.clone())
            .with_correlator(correlator.clone()),
    );

    if use_retry_once_mode() {
        let report = scheduler.run_batch().await?;
        tracing::info!(
            success = report.success_count,
            failed = report.failure_count,
            "Retry batch finished"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let charge_worker = ChargeWorker::new(settlement_rx, reconciler.clone());
    tokio::spawn(charge_worker.run());

    let retry_worker = RetryWorker::new(scheduler.clone());
    tokio::spawn(async move {
        retry_worker.run().await;
    });

    let state = Arc::new(AppState::new(coordinator, correlator, scheduler, reconciler));
    gateway::run_server(&app_config.gateway, state).await
}
