//! Common test utilities for integration tests.

use custodia::archive::BackupArchiver;
use custodia::audit::AuditLog;
use custodia::domain::{EntityStore, InMemoryEntityStore};
use custodia::integrity::IntegrityService;
use custodia::ledger::RetentionLedger;
use custodia::retention::RetentionService;
use custodia::signature::SignatureLedger;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A fully wired engine over temp storage, for end-to-end scenarios.
pub struct TestEngine {
    pub retention: Arc<RetentionService>,
    pub integrity: Arc<IntegrityService>,
    pub signatures: Arc<SignatureLedger>,
    pub archiver: Arc<BackupArchiver>,
    pub ledger: Arc<RetentionLedger>,
    pub entities: Arc<InMemoryEntityStore>,
    pub audit: Arc<AuditLog>,
    pub temp_dir: TempDir,
}

impl TestEngine {
    /// Builds an engine with file-backed ledgers and a 30-day grace window.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");

        let entities = Arc::new(InMemoryEntityStore::new());
        let audit = Arc::new(AuditLog::new());
        let ledger = Arc::new(
            RetentionLedger::open(temp_dir.path().join("retention_ledger.json"))
                .await
                .expect("Failed to open retention ledger"),
        );
        let signatures = Arc::new(
            SignatureLedger::open(temp_dir.path().join("signature_ledger.json"))
                .await
                .expect("Failed to open signature ledger"),
        );
        let archiver = Arc::new(BackupArchiver::new(
            temp_dir.path().join("backups"),
            None,
            Arc::clone(&entities) as Arc<dyn EntityStore>,
            Arc::clone(&audit),
        ));

        let retention = Arc::new(RetentionService::new(
            Arc::clone(&ledger),
            Arc::clone(&archiver),
            Arc::clone(&entities) as Arc<dyn EntityStore>,
            Arc::clone(&audit),
            2555,
            30,
        ));
        let integrity = Arc::new(IntegrityService::new(
            Arc::clone(&ledger),
            Arc::clone(&archiver),
            Arc::clone(&entities) as Arc<dyn EntityStore>,
            Arc::clone(&audit),
            5,
            Duration::from_secs(30),
            // Zero staleness: every row is always a sweep candidate, which
            // integration scenarios rely on when driving the clock by hand.
            Duration::from_secs(0),
        ));

        Self {
            retention,
            integrity,
            signatures,
            archiver,
            ledger,
            entities,
            audit,
            temp_dir,
        }
    }

    /// Asserts the central safety invariant over every ledger row:
    /// `is_deleted` implies `is_backed_up`, and the retention window is
    /// never inverted.
    pub async fn assert_invariants(&self) {
        for record in self.ledger.all().await {
            assert!(
                !record.is_deleted || record.is_backed_up,
                "safety invariant violated for {}/{}: deleted without backup",
                record.entity_type,
                record.entity_id
            );
            assert!(
                record.retention_until > record.created_at,
                "window invariant violated for {}/{}",
                record.entity_type,
                record.entity_id
            );
        }
    }
}
