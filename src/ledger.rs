//! Retention ledger: the system of record for data-lifecycle state.
//!
//! One [`RetentionRecord`] per tracked entity, keyed by
//! `(entity_type, entity_id)`. Every sweep and every facade operation reads
//! and writes through this ledger; rows are mutated one at a time and are
//! never physically removed — a deleted entity's row is the permanent
//! compliance trail.
//!
//! Rows live in memory behind an `RwLock` and are flushed to a JSON file
//! (write-temp-then-rename) after every mutation, so a crashed sweep simply
//! re-derives its candidate set from the reloaded file.

use crate::crypto;
use crate::error::{CustodiaError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Legal basis for a retention window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegalBasis {
    /// Statutory medical-records retention mandate.
    #[default]
    MedicalRecordsLaw,
    /// General data-protection legislation.
    DataProtectionLaw,
    /// Health-authority regulation.
    HealthAuthority,
    /// Explicit patient consent.
    Consent,
}

impl LegalBasis {
    /// Stable tag used in canonical hashes and archive metadata.
    pub fn as_tag(&self) -> &'static str {
        match self {
            LegalBasis::MedicalRecordsLaw => "MEDICAL_RECORDS_LAW",
            LegalBasis::DataProtectionLaw => "DATA_PROTECTION_LAW",
            LegalBasis::HealthAuthority => "HEALTH_AUTHORITY",
            LegalBasis::Consent => "CONSENT",
        }
    }
}

/// Derived lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStatus {
    /// Tracked, no backup yet.
    Active,
    /// Backed up, retention window still open.
    BackedUp,
    /// Retention expired, inside the grace window.
    MarkedForDeletion,
    /// Underlying entity destroyed; row kept as the compliance trail.
    Deleted,
}

/// One row per tracked entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRecord {
    /// Row ID.
    pub id: Uuid,
    /// Entity type tag, e.g. "WoundAssessment".
    pub entity_type: String,
    /// Entity ID within its type.
    pub entity_id: String,
    /// When the underlying entity was created.
    pub created_at: DateTime<Utc>,
    /// Earliest moment deletion may be considered. Extended by the grace
    /// window when the record is marked.
    pub retention_until: DateTime<Utc>,
    /// Retention window length in days.
    pub retention_days: u32,
    /// Legal basis for the window.
    pub legal_basis: LegalBasis,

    // Backup state
    pub is_backed_up: bool,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub backup_location: Option<PathBuf>,
    pub backup_hash: Option<String>,

    // Deletion state
    pub is_marked_for_deletion: bool,
    pub marked_for_deletion_at: Option<DateTime<Utc>>,
    pub deletion_reason: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,

    // Integrity state
    pub last_verified_at: Option<DateTime<Utc>>,
    pub integrity_verified: bool,
    pub verification_hash: Option<String>,
    pub requires_special_handling: bool,
    pub special_handling_notes: Option<String>,

    // Ledger row bookkeeping
    pub record_created_at: DateTime<Utc>,
    pub record_updated_at: Option<DateTime<Utc>>,
}

impl RetentionRecord {
    /// Creates a new record. Fails when the retention window would be empty
    /// or inverted (`retention_until` must stay strictly after `created_at`).
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        created_at: DateTime<Utc>,
        retention_days: u32,
        legal_basis: LegalBasis,
    ) -> Result<Self> {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();

        if entity_type.trim().is_empty() {
            return Err(CustodiaError::Validation(
                "entity type cannot be empty".to_string(),
            ));
        }
        if entity_id.trim().is_empty() {
            return Err(CustodiaError::Validation(
                "entity id cannot be empty".to_string(),
            ));
        }
        if retention_days == 0 {
            return Err(CustodiaError::Validation(
                "retention window must be at least one day".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id,
            created_at,
            retention_until: created_at + Duration::days(i64::from(retention_days)),
            retention_days,
            legal_basis,
            is_backed_up: false,
            last_backup_at: None,
            backup_location: None,
            backup_hash: None,
            is_marked_for_deletion: false,
            marked_for_deletion_at: None,
            deletion_reason: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            last_verified_at: None,
            integrity_verified: true,
            verification_hash: None,
            requires_special_handling: false,
            special_handling_notes: None,
            record_created_at: Utc::now(),
            record_updated_at: None,
        })
    }

    /// Ledger key for this record.
    pub fn key(&self) -> String {
        record_key(&self.entity_type, &self.entity_id)
    }

    /// Derived lifecycle status.
    pub fn status(&self) -> RetentionStatus {
        if self.is_deleted {
            RetentionStatus::Deleted
        } else if self.is_marked_for_deletion {
            RetentionStatus::MarkedForDeletion
        } else if self.is_backed_up {
            RetentionStatus::BackedUp
        } else {
            RetentionStatus::Active
        }
    }

    /// Whether the retention window has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.retention_until < now
    }

    /// Canonical hash over the identity-and-window tuple. The integrity sweep
    /// recomputes this and compares against the stored `verification_hash` to
    /// detect tampering with the row itself.
    pub fn compute_verification_hash(&self) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            self.entity_type,
            self.entity_id,
            self.created_at.to_rfc3339(),
            self.retention_until.to_rfc3339(),
            self.legal_basis.as_tag(),
        );
        crypto::sha256_hex(canonical.as_bytes())
    }
}

/// Composite ledger key.
pub fn record_key(entity_type: &str, entity_id: &str) -> String {
    format!("{}/{}", entity_type, entity_id)
}

/// Counts backing the statistics surface, computed in one pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub total: u64,
    pub backed_up: u64,
    pub pending_deletion: u64,
    pub deleted: u64,
    pub integrity_verified: u64,
    pub integrity_failed: u64,
    pub special_handling: u64,
}

/// The retention ledger.
pub struct RetentionLedger {
    records: RwLock<HashMap<String, RetentionRecord>>,
    path: Option<PathBuf>,
}

impl RetentionLedger {
    /// Creates a memory-only ledger (tests).
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Opens a file-backed ledger, loading existing rows if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut records = HashMap::new();
        if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            let rows: Vec<RetentionRecord> = serde_json::from_slice(&bytes)
                .map_err(|e| CustodiaError::Storage(format!("Ledger file unreadable: {}", e)))?;
            for row in rows {
                records.insert(row.key(), row);
            }
            info!(path = %path.display(), rows = records.len(), "Loaded retention ledger");
        }

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    /// Registers a record. Fails with `DuplicateEntity` when a non-deleted row
    /// already exists for the key; a deleted row is superseded (the entity has
    /// re-entered scope).
    pub async fn register(&self, record: RetentionRecord) -> Result<RetentionRecord> {
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(&record.key()) {
            if !existing.is_deleted {
                return Err(CustodiaError::DuplicateEntity {
                    entity_type: record.entity_type.clone(),
                    entity_id: record.entity_id.clone(),
                });
            }
            warn!(
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                "Re-registering entity whose previous lifecycle ended in deletion"
            );
        }

        records.insert(record.key(), record.clone());
        self.persist(&records).await?;
        Ok(record)
    }

    /// Fetches a record by key.
    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Option<RetentionRecord> {
        let records = self.records.read().await;
        records.get(&record_key(entity_type, entity_id)).cloned()
    }

    /// Single-row read-modify-write. Stamps `record_updated_at` and persists.
    pub async fn update<F>(
        &self,
        entity_type: &str,
        entity_id: &str,
        mutate: F,
    ) -> Result<RetentionRecord>
    where
        F: FnOnce(&mut RetentionRecord),
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&record_key(entity_type, entity_id))
            .ok_or_else(|| {
                CustodiaError::NotFound(format!("Retention row {}/{}", entity_type, entity_id))
            })?;

        mutate(record);
        record.record_updated_at = Some(Utc::now());
        let updated = record.clone();

        self.persist(&records).await?;
        Ok(updated)
    }

    /// Rows with no backup yet and not deleted.
    pub async fn find_pending_backup(&self) -> Vec<RetentionRecord> {
        self.filter(|r| !r.is_backed_up && !r.is_deleted).await
    }

    /// Rows whose window lapsed before `now`, not yet marked, not deleted.
    pub async fn find_expired_ready_for_deletion(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<RetentionRecord> {
        self.filter(|r| r.is_expired(now) && !r.is_deleted && !r.is_marked_for_deletion)
            .await
    }

    /// Rows marked for deletion before `cutoff` and not yet deleted. The
    /// deletion sweep passes `now - grace` as the cutoff.
    pub async fn find_marked_ready_for_deletion(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Vec<RetentionRecord> {
        self.filter(|r| {
            !r.is_deleted
                && r.is_marked_for_deletion
                && r.marked_for_deletion_at
                    .map(|marked| marked < cutoff)
                    .unwrap_or(false)
        })
        .await
    }

    /// Non-deleted rows never verified, or last verified before
    /// `now - staleness`.
    pub async fn find_needing_verification(
        &self,
        staleness: Duration,
        now: DateTime<Utc>,
    ) -> Vec<RetentionRecord> {
        let threshold = now - staleness;
        self.filter(|r| {
            !r.is_deleted
                && r.last_verified_at
                    .map(|verified| verified < threshold)
                    .unwrap_or(true)
        })
        .await
    }

    /// One-pass counts for the statistics surface.
    pub async fn counts(&self) -> LedgerCounts {
        let records = self.records.read().await;
        let mut counts = LedgerCounts::default();

        for record in records.values() {
            counts.total += 1;
            if record.is_backed_up {
                counts.backed_up += 1;
            }
            if record.is_marked_for_deletion && !record.is_deleted {
                counts.pending_deletion += 1;
            }
            if record.is_deleted {
                counts.deleted += 1;
            }
            if record.integrity_verified {
                counts.integrity_verified += 1;
            } else {
                counts.integrity_failed += 1;
            }
            if record.requires_special_handling {
                counts.special_handling += 1;
            }
        }

        counts
    }

    /// All rows, unordered.
    pub async fn all(&self) -> Vec<RetentionRecord> {
        self.records.read().await.values().cloned().collect()
    }

    async fn filter<F>(&self, predicate: F) -> Vec<RetentionRecord>
    where
        F: Fn(&RetentionRecord) -> bool,
    {
        let records = self.records.read().await;
        records.values().filter(|r| predicate(r)).cloned().collect()
    }

    async fn persist(&self, records: &HashMap<String, RetentionRecord>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut rows: Vec<&RetentionRecord> = records.values().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        let bytes = serde_json::to_vec_pretty(&rows)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
