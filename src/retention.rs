//! Retention service: registration, the backup sweep, and the deletion sweep.
//!
//! The deletion sweep runs in two phases. Phase one marks rows whose retention
//! window has lapsed and opens the 30-day grace window. Phase two executes
//! deletions for rows marked longer ago than the grace window — and only for
//! rows with a verified backup. The abort branch in phase two is the
//! enforcement point of the engine's one hard safety rule: data with no
//! verified backup is never destroyed, regardless of how long ago retention
//! expired.
//!
//! Failures are isolated per record: one row's backup or deletion failure is
//! logged and the sweep moves on. A failed backup leaves the row pending, so
//! it is retried on every subsequent sweep until it succeeds.

use crate::archive::BackupArchiver;
use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::domain::EntityStore;
use crate::error::Result;
use crate::ledger::{LegalBasis, RetentionLedger, RetentionRecord};
use crate::observability;
use crate::scheduling::scheduler::SweepExecutor;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Actor recorded for sweep-driven deletions.
const AUTO_DELETION_ACTOR: &str = "system:auto-deletion";

/// Annotation left on a row when phase two refuses to delete it.
const NO_BACKUP_ANNOTATION: &str = "deletion cancelled: no verified backup";

/// Outcome of one backup sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BackupSweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of one deletion sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeletionSweepReport {
    pub marked: usize,
    pub deleted: usize,
    pub aborted: usize,
}

/// Retention statistics for the facade.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetentionStatistics {
    pub total_records: u64,
    pub backed_up_records: u64,
    pub pending_deletion: u64,
    pub deleted_records: u64,
}

/// The retention service.
pub struct RetentionService {
    ledger: Arc<RetentionLedger>,
    archiver: Arc<BackupArchiver>,
    entities: Arc<dyn EntityStore>,
    audit: Arc<AuditLog>,
    default_retention_days: u32,
    grace_days: u32,
}

impl RetentionService {
    /// Creates the service.
    pub fn new(
        ledger: Arc<RetentionLedger>,
        archiver: Arc<BackupArchiver>,
        entities: Arc<dyn EntityStore>,
        audit: Arc<AuditLog>,
        default_retention_days: u32,
        grace_days: u32,
    ) -> Self {
        Self {
            ledger,
            archiver,
            entities,
            audit,
            default_retention_days,
            grace_days,
        }
    }

    /// Registers an entity for retention. `retention_days` defaults to the
    /// configured window (2555 days).
    pub async fn register(
        &self,
        entity_type: &str,
        entity_id: &str,
        created_at: DateTime<Utc>,
        retention_days: Option<u32>,
        actor: &str,
    ) -> Result<RetentionRecord> {
        let days = retention_days.unwrap_or(self.default_retention_days);
        let record = RetentionRecord::new(
            entity_type,
            entity_id,
            created_at,
            days,
            LegalBasis::MedicalRecordsLaw,
        )?;

        let record = self.ledger.register(record).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::RetentionRegistered, actor)
                    .with_entity(entity_type, entity_id)
                    .with_detail(format!("retention until {}", record.retention_until)),
            )
            .await;
        observability::record_registration();
        observability::update_ledger_size(self.ledger.counts().await.total);

        info!(
            entity_type,
            entity_id,
            retention_until = %record.retention_until,
            "Registered entity for retention"
        );

        Ok(record)
    }

    /// Backs up one entity now, updating its ledger row when one exists.
    /// The facade's force-backup path.
    pub async fn force_backup(
        &self,
        entity_type: &str,
        entity_id: &str,
        actor: &str,
    ) -> Result<(PathBuf, String)> {
        match self.archiver.create_backup(entity_type, entity_id).await {
            Ok((location, digest)) => {
                if self.ledger.get(entity_type, entity_id).await.is_some() {
                    self.ledger
                        .update(entity_type, entity_id, |record| {
                            record.is_backed_up = true;
                            record.last_backup_at = Some(Utc::now());
                            record.backup_location = Some(location.clone());
                            record.backup_hash = Some(digest.clone());
                        })
                        .await?;
                }

                self.audit
                    .record(
                        AuditEvent::new(AuditEventType::BackupCreated, actor)
                            .with_entity(entity_type, entity_id)
                            .with_detail(location.display().to_string()),
                    )
                    .await;
                observability::record_backup(true);

                Ok((location, digest))
            }
            Err(e) => {
                self.audit
                    .record(
                        AuditEvent::new(AuditEventType::BackupFailed, actor)
                            .with_entity(entity_type, entity_id)
                            .failed(e.to_string()),
                    )
                    .await;
                observability::record_backup(false);
                Err(e)
            }
        }
    }

    /// The daily backup sweep: archives every row still pending backup.
    pub async fn run_backup_sweep(&self) -> Result<BackupSweepReport> {
        let pending = self.ledger.find_pending_backup().await;
        let mut report = BackupSweepReport {
            attempted: pending.len(),
            ..Default::default()
        };

        for record in pending {
            match self
                .force_backup(&record.entity_type, &record.entity_id, "system:backup-sweep")
                .await
            {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        entity_type = %record.entity_type,
                        entity_id = %record.entity_id,
                        error = %e,
                        "Backup failed; row stays pending for the next sweep"
                    );
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Backup sweep finished"
        );
        Ok(report)
    }

    /// The daily deletion sweep. `now` is injected so tests drive the clock.
    pub async fn run_deletion_sweep(&self, now: DateTime<Utc>) -> Result<DeletionSweepReport> {
        let mut report = DeletionSweepReport::default();
        let grace = Duration::days(i64::from(self.grace_days));

        // Phase one: mark rows whose retention window has lapsed and open the
        // grace window.
        for record in self.ledger.find_expired_ready_for_deletion(now).await {
            let result = self
                .ledger
                .update(&record.entity_type, &record.entity_id, |r| {
                    r.is_marked_for_deletion = true;
                    r.marked_for_deletion_at = Some(now);
                    r.deletion_reason = Some("retention period expired".to_string());
                    r.retention_until = now + grace;
                    // Marking legitimately moves retention_until, which is
                    // part of the canonical row hash.
                    if r.verification_hash.is_some() {
                        r.verification_hash = Some(r.compute_verification_hash());
                    }
                })
                .await;

            match result {
                Ok(_) => {
                    report.marked += 1;
                    self.audit
                        .record(
                            AuditEvent::new(AuditEventType::MarkedForDeletion, AUTO_DELETION_ACTOR)
                                .with_entity(&record.entity_type, &record.entity_id)
                                .with_detail(format!("grace window ends {}", now + grace)),
                        )
                        .await;
                    observability::record_deletion_marked();
                }
                Err(e) => {
                    error!(
                        entity_type = %record.entity_type,
                        entity_id = %record.entity_id,
                        error = %e,
                        "Failed to mark row for deletion"
                    );
                }
            }
        }

        // Phase two: execute deletions for rows whose grace window has
        // elapsed. A row without a verified backup is never deleted.
        for record in self.ledger.find_marked_ready_for_deletion(now - grace).await {
            if !record.is_backed_up {
                let result = self
                    .ledger
                    .update(&record.entity_type, &record.entity_id, |r| {
                        r.deletion_reason = Some(NO_BACKUP_ANNOTATION.to_string());
                    })
                    .await;
                if let Err(e) = result {
                    error!(
                        entity_type = %record.entity_type,
                        entity_id = %record.entity_id,
                        error = %e,
                        "Failed to annotate aborted deletion"
                    );
                }

                report.aborted += 1;
                self.audit
                    .record(
                        AuditEvent::new(AuditEventType::DeletionAborted, AUTO_DELETION_ACTOR)
                            .with_entity(&record.entity_type, &record.entity_id)
                            .failed(NO_BACKUP_ANNOTATION),
                    )
                    .await;
                observability::record_deletion(false);
                warn!(
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    "Deletion aborted: no verified backup"
                );
                continue;
            }

            match self
                .entities
                .delete(&record.entity_type, &record.entity_id)
                .await
            {
                Ok(()) => {
                    self.ledger
                        .update(&record.entity_type, &record.entity_id, |r| {
                            r.is_deleted = true;
                            r.deleted_at = Some(now);
                            r.deleted_by = Some(AUTO_DELETION_ACTOR.to_string());
                        })
                        .await?;

                    report.deleted += 1;
                    self.audit
                        .record(
                            AuditEvent::new(AuditEventType::DeletionExecuted, AUTO_DELETION_ACTOR)
                                .with_entity(&record.entity_type, &record.entity_id),
                        )
                        .await;
                    observability::record_deletion(true);
                }
                Err(e) => {
                    // Row stays marked and pending; retried next sweep.
                    error!(
                        entity_type = %record.entity_type,
                        entity_id = %record.entity_id,
                        error = %e,
                        "Domain store failed to delete entity"
                    );
                }
            }
        }

        info!(
            marked = report.marked,
            deleted = report.deleted,
            aborted = report.aborted,
            "Deletion sweep finished"
        );
        Ok(report)
    }

    /// Retention statistics for the facade.
    pub async fn statistics(&self) -> RetentionStatistics {
        let counts = self.ledger.counts().await;
        RetentionStatistics {
            total_records: counts.total,
            backed_up_records: counts.backed_up,
            pending_deletion: counts.pending_deletion,
            deleted_records: counts.deleted,
        }
    }
}

/// Scheduler adapter for the backup sweep.
pub struct BackupSweepExecutor(pub Arc<RetentionService>);

#[async_trait]
impl SweepExecutor for BackupSweepExecutor {
    async fn execute(&self) -> std::result::Result<String, String> {
        let report = self.0.run_backup_sweep().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "{} attempted, {} succeeded, {} failed",
            report.attempted, report.succeeded, report.failed
        ))
    }

    fn name(&self) -> &str {
        "backup-sweep"
    }
}

/// Scheduler adapter for the deletion sweep.
pub struct DeletionSweepExecutor(pub Arc<RetentionService>);

#[async_trait]
impl SweepExecutor for DeletionSweepExecutor {
    async fn execute(&self) -> std::result::Result<String, String> {
        let report = self
            .0
            .run_deletion_sweep(Utc::now())
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "{} marked, {} deleted, {} aborted",
            report.marked, report.deleted, report.aborted
        ))
    }

    fn name(&self) -> &str {
        "deletion-sweep"
    }
}
