//! Integrity verification sweep.
//!
//! Re-validates stored state on a rolling schedule: each candidate row is
//! checked for impossible timestamps, a live underlying entity, an intact
//! backup artifact, and an unchanged canonical row hash. Records are
//! independent, so verification fans out over a bounded worker pool and the
//! sweep joins all workers before reporting (fan-out/fan-in).
//!
//! A failed check is not an error — it is recorded on the row
//! (`integrity_verified=false`, `requires_special_handling=true`, notes
//! listing every failed check) so the finding survives across sweeps and is
//! queryable. Only on full success is the canonical row hash refreshed;
//! a mismatch therefore keeps failing until an operator intervenes.

use crate::archive::BackupArchiver;
use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::domain::EntityStore;
use crate::error::{CustodiaError, Result};
use crate::ledger::{RetentionLedger, RetentionRecord};
use crate::observability;
use crate::scheduling::scheduler::SweepExecutor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Outcome of one integrity sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IntegritySweepReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Integrity statistics for the facade.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IntegrityStatistics {
    pub total_records: u64,
    pub verified_records: u64,
    pub failed_records: u64,
    pub special_handling_records: u64,
    pub integrity_percentage: f64,
}

/// The integrity verification service.
#[derive(Clone)]
pub struct IntegrityService {
    ledger: Arc<RetentionLedger>,
    archiver: Arc<BackupArchiver>,
    entities: Arc<dyn EntityStore>,
    audit: Arc<AuditLog>,
    workers: usize,
    verify_timeout: Duration,
    staleness: Duration,
}

impl IntegrityService {
    /// Creates the service. `workers` bounds the verification pool,
    /// `verify_timeout` bounds one record's check, `staleness` selects rows
    /// whose last verification is too old.
    pub fn new(
        ledger: Arc<RetentionLedger>,
        archiver: Arc<BackupArchiver>,
        entities: Arc<dyn EntityStore>,
        audit: Arc<AuditLog>,
        workers: usize,
        verify_timeout: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            ledger,
            archiver,
            entities,
            audit,
            workers: workers.max(1),
            verify_timeout,
            staleness,
        }
    }

    /// The weekly integrity sweep. Dispatches every stale row to the worker
    /// pool and waits for all workers before returning.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<IntegritySweepReport> {
        let staleness = chrono::Duration::from_std(self.staleness)
            .map_err(|e| CustodiaError::Internal(format!("staleness out of range: {}", e)))?;
        let candidates = self.ledger.find_needing_verification(staleness, now).await;

        let mut report = IntegritySweepReport {
            checked: candidates.len(),
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for record in candidates {
            let service = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");

                let verified = tokio::time::timeout(
                    service.verify_timeout,
                    service.verify_record(&record.entity_type, &record.entity_id, now),
                )
                .await;

                match verified {
                    Ok(result) => result.map(|passed| (passed, false)),
                    Err(_) => {
                        service.flag_timeout(&record, now).await;
                        Ok((false, true))
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((passed, timed_out))) => {
                    if timed_out {
                        report.timed_out += 1;
                        report.failed += 1;
                    } else if passed {
                        report.passed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Ok(Err(e)) => {
                    // One record's failure never aborts the others.
                    report.failed += 1;
                    warn!(error = %e, "Integrity check errored");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "Integrity worker panicked");
                }
            }
        }

        info!(
            checked = report.checked,
            passed = report.passed,
            failed = report.failed,
            timed_out = report.timed_out,
            "Integrity sweep finished"
        );
        Ok(report)
    }

    /// Verifies one record now and persists the finding on its row. The
    /// facade's force-verify path.
    pub async fn verify_record(
        &self,
        entity_type: &str,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let record = self.ledger.get(entity_type, entity_id).await.ok_or_else(|| {
            CustodiaError::NotFound(format!("Retention row {}/{}", entity_type, entity_id))
        })?;

        let failures = self.evaluate(&record, now).await;
        let passed = failures.is_empty();

        self.ledger
            .update(entity_type, entity_id, |r| {
                r.integrity_verified = passed;
                r.last_verified_at = Some(now);
                if passed {
                    r.verification_hash = Some(r.compute_verification_hash());
                } else {
                    r.requires_special_handling = true;
                    r.special_handling_notes =
                        Some(format!("integrity check failures: {}", failures.join("; ")));
                }
            })
            .await?;

        let event_type = if passed {
            AuditEventType::IntegrityVerified
        } else {
            AuditEventType::IntegrityFailed
        };
        let mut event = AuditEvent::new(event_type, "system:integrity-sweep")
            .with_entity(entity_type, entity_id);
        if !passed {
            event = event.failed(failures.join("; "));
        }
        self.audit.record(event).await;
        observability::record_integrity_check(passed);

        if !passed {
            warn!(entity_type, entity_id, failures = ?failures, "Integrity check failed");
        }

        Ok(passed)
    }

    /// Integrity statistics for the facade.
    pub async fn statistics(&self) -> IntegrityStatistics {
        let counts = self.ledger.counts().await;
        let integrity_percentage = if counts.total == 0 {
            0.0
        } else {
            counts.integrity_verified as f64 / counts.total as f64 * 100.0
        };

        IntegrityStatistics {
            total_records: counts.total,
            verified_records: counts.integrity_verified,
            failed_records: counts.integrity_failed,
            special_handling_records: counts.special_handling,
            integrity_percentage,
        }
    }

    /// Runs every check against one row; returns the list of failures.
    async fn evaluate(&self, record: &RetentionRecord, now: DateTime<Utc>) -> Vec<String> {
        let mut failures = Vec::new();

        // Impossible timestamps
        if record.created_at > now {
            failures.push("creation timestamp is in the future".to_string());
        }
        if record.retention_until <= record.created_at {
            failures.push("retention window is inverted".to_string());
        }

        // Underlying entity
        match self
            .entities
            .exists(&record.entity_type, &record.entity_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => failures.push("underlying entity missing from domain store".to_string()),
            Err(e) => failures.push(format!("domain store error: {}", e)),
        }

        // Backup artifact
        if record.is_backed_up {
            match (&record.backup_location, &record.backup_hash) {
                (Some(location), Some(hash)) => {
                    if !self.archiver.verify_integrity(location, hash).await {
                        failures.push("backup artifact corrupted or missing".to_string());
                    }
                }
                _ => failures.push("backup state incomplete on ledger row".to_string()),
            }
        }

        // Canonical row hash
        if let Some(stored) = &record.verification_hash {
            if stored != &record.compute_verification_hash() {
                failures.push("verification hash mismatch".to_string());
            }
        }

        failures
    }

    async fn flag_timeout(&self, record: &RetentionRecord, now: DateTime<Utc>) {
        let result = self
            .ledger
            .update(&record.entity_type, &record.entity_id, |r| {
                r.integrity_verified = false;
                r.last_verified_at = Some(now);
                r.requires_special_handling = true;
                r.special_handling_notes = Some("integrity verification timed out".to_string());
            })
            .await;
        if let Err(e) = result {
            warn!(
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                error = %e,
                "Failed to flag timed-out verification"
            );
        }

        self.audit
            .record(
                AuditEvent::new(AuditEventType::IntegrityFailed, "system:integrity-sweep")
                    .with_entity(&record.entity_type, &record.entity_id)
                    .failed("verification timed out"),
            )
            .await;
        observability::record_integrity_check(false);
    }
}

/// Scheduler adapter for the integrity sweep.
pub struct IntegritySweepExecutor(pub Arc<IntegrityService>);

#[async_trait]
impl SweepExecutor for IntegritySweepExecutor {
    async fn execute(&self) -> std::result::Result<String, String> {
        let report = self
            .0
            .run_sweep(Utc::now())
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "{} checked, {} passed, {} failed",
            report.checked, report.passed, report.failed
        ))
    }

    fn name(&self) -> &str {
        "integrity-sweep"
    }
}
