//! Custodia - a regulatory data-lifecycle and integrity engine.
//!
//! Custodia tracks every record subject to mandatory multi-year retention,
//! backs it up on a schedule, verifies that backups and ledger state stay
//! byte-for-byte trustworthy, enforces a safe and auditable deletion path
//! once retention lapses, and issues and verifies non-repudiable digital
//! signatures on clinical documents.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Custodia                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Facade: HTTP compliance API | statistics | manual overrides │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Sweeps: backup (daily) | deletion (daily) | integrity (wk)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Ledgers: retention rows | digital signatures | audit trail  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Storage: backup archives (AES-256-GCM) | hash sidecars      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The one hard safety rule, enforced unconditionally in the deletion sweep:
//! data with no verified backup is never destroyed.
//!
//! # Quick Start
//!
//! ```no_run
//! use custodia::config::CustodiaConfig;
//! use custodia::domain::InMemoryEntityStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> custodia::Result<()> {
//!     let config = CustodiaConfig::development();
//!     // The platform injects its real domain accessor here.
//!     let entities = Arc::new(InMemoryEntityStore::new());
//!     custodia::run(config, entities).await
//! }
//! ```

pub mod api;
pub mod archive;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod observability;
pub mod retention;
pub mod scheduling;
pub mod signature;

// Re-exports
pub use error::{CustodiaError, Result};

use crate::api::ApiState;
use crate::archive::{ArchiveCipher, BackupArchiver};
use crate::audit::AuditLog;
use crate::config::CustodiaConfig;
use crate::domain::EntityStore;
use crate::integrity::{IntegrityService, IntegritySweepExecutor};
use crate::ledger::RetentionLedger;
use crate::retention::{BackupSweepExecutor, DeletionSweepExecutor, RetentionService};
use crate::scheduling::cron::Schedule;
use crate::scheduling::scheduler::SweepScheduler;
use crate::signature::SignatureLedger;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the Custodia engine with the given configuration and domain accessor.
pub async fn run(config: CustodiaConfig, entities: Arc<dyn EntityStore>) -> Result<()> {
    config.validate()?;
    observability::init(&config.observability)?;
    info!("Starting Custodia lifecycle engine");

    tokio::fs::create_dir_all(&config.storage.backup_dir).await?;

    let cipher = if config.encryption.enabled {
        Some(match &config.encryption.key {
            Some(key) => ArchiveCipher::from_base64(key)?,
            None => {
                let (cipher, key) = ArchiveCipher::generate()?;
                warn!(
                    key = %key,
                    "No archive key configured; generated one. Store it, or existing \
                     archives become unreadable after a restart."
                );
                cipher
            }
        })
    } else {
        None
    };

    let audit = Arc::new(AuditLog::new());
    let ledger = Arc::new(RetentionLedger::open(&config.storage.ledger_path).await?);
    let signatures = Arc::new(SignatureLedger::open(&config.storage.signature_path).await?);
    let archiver = Arc::new(BackupArchiver::new(
        &config.storage.backup_dir,
        cipher,
        Arc::clone(&entities),
        Arc::clone(&audit),
    ));

    let retention = Arc::new(RetentionService::new(
        Arc::clone(&ledger),
        Arc::clone(&archiver),
        Arc::clone(&entities),
        Arc::clone(&audit),
        config.retention.default_retention_days,
        config.retention.grace_days,
    ));
    let integrity = Arc::new(IntegrityService::new(
        Arc::clone(&ledger),
        Arc::clone(&archiver),
        Arc::clone(&entities),
        Arc::clone(&audit),
        config.sweeps.verify_workers,
        config.sweeps.verify_timeout,
        config.sweeps.verify_staleness,
    ));

    // Registration order is execution order: the backup sweep always runs
    // before the deletion sweep when both are due.
    let scheduler = Arc::new(SweepScheduler::new());
    scheduler
        .register(
            Schedule::parse(&config.sweeps.backup_schedule)
                .map_err(|e| CustodiaError::Config(e.to_string()))?,
            Arc::new(BackupSweepExecutor(Arc::clone(&retention))),
        )
        .await;
    scheduler
        .register(
            Schedule::parse(&config.sweeps.deletion_schedule)
                .map_err(|e| CustodiaError::Config(e.to_string()))?,
            Arc::new(DeletionSweepExecutor(Arc::clone(&retention))),
        )
        .await;
    scheduler
        .register(
            Schedule::parse(&config.sweeps.integrity_schedule)
                .map_err(|e| CustodiaError::Config(e.to_string()))?,
            Arc::new(IntegritySweepExecutor(Arc::clone(&integrity))),
        )
        .await;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut handles = Vec::new();

    {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_tx.subscribe();
        handles.push((
            "scheduler",
            tokio::spawn(async move {
                scheduler.run(shutdown).await;
            }),
        ));
    }

    if config.api.enabled {
        let state = ApiState {
            retention: Arc::clone(&retention),
            integrity: Arc::clone(&integrity),
            signatures: Arc::clone(&signatures),
            archiver: Arc::clone(&archiver),
        };
        let api_config = config.api.clone();
        handles.push((
            "api",
            tokio::spawn(async move {
                if let Err(e) = api::run_api_server(api_config, state).await {
                    error!("Compliance facade error: {}", e);
                }
            }),
        ));
    }

    if config.observability.metrics_enabled {
        let obs_config = config.observability.clone();
        handles.push((
            "metrics",
            tokio::spawn(async move {
                if let Err(e) = observability::run_metrics_server(obs_config).await {
                    error!("Metrics server error: {}", e);
                }
            }),
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down Custodia gracefully");
    let _ = shutdown_tx.send(());

    for (name, handle) in handles {
        if name == "scheduler" {
            // Let the scheduler observe the shutdown signal and finish any
            // in-flight sweep.
            let _ = handle.await;
        } else if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Custodia shutdown complete");
    Ok(())
}
