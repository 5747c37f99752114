//! End-to-end lifecycle tests.
//!
//! Drives the retention, backup, deletion, and integrity sweeps through full
//! record lifecycles with a hand-controlled clock, asserting the safety
//! invariants after every step.

#[allow(dead_code)]
mod common;

use chrono::{Duration, TimeZone, Utc};
use common::TestEngine;
use custodia::domain::EntityStore;
use serde_json::json;

// =============================================================================
// Scenario A: normal lifecycle inside the retention window
// =============================================================================

#[tokio::test]
async fn test_scenario_a_register_backup_and_wait() {
    let engine = TestEngine::new().await;
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    engine
        .entities
        .insert("WoundAssessment", "123", json!({"stage": 2, "site": "heel"}))
        .await;

    let record = engine
        .retention
        .register("WoundAssessment", "123", created, None, "admin")
        .await
        .unwrap();

    // Default window: 2555 days, landing in December 2030.
    assert_eq!(record.retention_days, 2555);
    assert_eq!(record.retention_until, created + Duration::days(2555));
    assert_eq!(record.retention_until.format("%Y-%m").to_string(), "2030-12");

    // Backup sweep picks the record up.
    let report = engine.retention.run_backup_sweep().await.unwrap();
    assert_eq!(report.succeeded, 1);
    let record = engine.ledger.get("WoundAssessment", "123").await.unwrap();
    assert!(record.is_backed_up);

    // Deletion sweep before expiry leaves the record untouched.
    let before_expiry = created + Duration::days(100);
    let report = engine.retention.run_deletion_sweep(before_expiry).await.unwrap();
    assert_eq!(report.marked, 0);
    assert_eq!(report.deleted, 0);

    let record = engine.ledger.get("WoundAssessment", "123").await.unwrap();
    assert!(!record.is_marked_for_deletion);
    assert!(!record.is_deleted);

    engine.assert_invariants().await;
}

// =============================================================================
// Scenario B: retention expired but no backup ever succeeded
// =============================================================================

#[tokio::test]
async fn test_scenario_b_no_backup_blocks_deletion_indefinitely() {
    let engine = TestEngine::new().await;
    let created = Utc::now() - Duration::days(3000);

    engine
        .entities
        .insert("WoundAssessment", "123", json!({"stage": 4}))
        .await;
    engine
        .retention
        .register("WoundAssessment", "123", created, None, "admin")
        .await
        .unwrap();

    // The window has lapsed; the sweep marks the record.
    let now = Utc::now();
    let report = engine.retention.run_deletion_sweep(now).await.unwrap();
    assert_eq!(report.marked, 1);

    // Daily sweeps long past the grace window keep aborting: no backup.
    for day in [31, 60, 120, 365] {
        let report = engine
            .retention
            .run_deletion_sweep(now + Duration::days(day))
            .await
            .unwrap();
        assert_eq!(report.deleted, 0, "deleted on day {}", day);
        assert_eq!(report.aborted, 1, "no abort on day {}", day);
    }

    let record = engine.ledger.get("WoundAssessment", "123").await.unwrap();
    assert!(!record.is_deleted);
    assert_eq!(
        record.deletion_reason.as_deref(),
        Some("deletion cancelled: no verified backup")
    );
    assert!(engine.entities.exists("WoundAssessment", "123").await.unwrap());

    // A successful backup unblocks the pending deletion on the next sweep.
    engine.retention.run_backup_sweep().await.unwrap();
    let report = engine
        .retention
        .run_deletion_sweep(now + Duration::days(366))
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);

    let record = engine.ledger.get("WoundAssessment", "123").await.unwrap();
    assert!(record.is_deleted);
    assert!(record.is_backed_up);

    engine.assert_invariants().await;
}

// =============================================================================
// Grace period
// =============================================================================

#[tokio::test]
async fn test_grace_period_holds_under_daily_sweeps() {
    let engine = TestEngine::new().await;
    let created = Utc::now() - Duration::days(3000);

    engine
        .entities
        .insert("Appointment", "a-77", json!({"date": "2016-05-01"}))
        .await;
    engine
        .retention
        .register("Appointment", "a-77", created, None, "admin")
        .await
        .unwrap();
    engine.retention.run_backup_sweep().await.unwrap();

    let marked_at = Utc::now();
    engine.retention.run_deletion_sweep(marked_at).await.unwrap();

    // A sweep every single day of the grace window: never deletes early.
    for day in 1..=30 {
        let report = engine
            .retention
            .run_deletion_sweep(marked_at + Duration::days(day))
            .await
            .unwrap();
        assert_eq!(report.deleted, 0, "premature deletion on day {}", day);
        engine.assert_invariants().await;
    }

    // Day 31 is past the full grace window.
    let report = engine
        .retention
        .run_deletion_sweep(marked_at + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    engine.assert_invariants().await;
}

// =============================================================================
// Backup round-trip and corruption
// =============================================================================

#[tokio::test]
async fn test_backup_round_trip_and_corruption_detection() {
    let engine = TestEngine::new().await;

    engine
        .entities
        .insert("Patient", "p-1", json!({"name": "test patient", "age": 63}))
        .await;

    let (location, digest) = engine.archiver.create_backup("Patient", "p-1").await.unwrap();

    // Round-trip: verification passes immediately after creation.
    assert!(engine.archiver.verify_integrity(&location, &digest).await);

    // Restore replays the snapshot after the entity disappears.
    engine.entities.remove("Patient", "p-1").await;
    assert!(engine.archiver.restore(&location).await);
    assert!(engine.entities.exists("Patient", "p-1").await.unwrap());

    // Truncation is detected.
    let bytes = std::fs::read(&location).unwrap();
    std::fs::write(&location, &bytes[..bytes.len() - 7]).unwrap();
    assert!(!engine.archiver.verify_integrity(&location, &digest).await);

    // And the listing still includes the (now corrupt) artifact rather than
    // failing outright.
    let listing = engine.archiver.list_backups().await;
    assert_eq!(listing.len(), 1);
}

// =============================================================================
// Integrity sweep: idempotence and corruption flagging
// =============================================================================

#[tokio::test]
async fn test_integrity_sweep_idempotence() {
    let engine = TestEngine::new().await;

    for i in 0..4 {
        let id = format!("w-{}", i);
        engine
            .entities
            .insert("WoundAssessment", &id, json!({"index": i}))
            .await;
        engine
            .retention
            .register("WoundAssessment", &id, Utc::now() - Duration::days(10), None, "admin")
            .await
            .unwrap();
    }
    engine.retention.run_backup_sweep().await.unwrap();

    let now = Utc::now();
    engine.integrity.run_sweep(now).await.unwrap();
    let first: Vec<_> = sorted_rows(&engine).await;

    // Second sweep with no intervening change: same verdicts, same backup
    // locations and hashes. A later clock re-selects every row.
    engine
        .integrity
        .run_sweep(now + Duration::minutes(5))
        .await
        .unwrap();
    let second: Vec<_> = sorted_rows(&engine).await;
    assert_eq!(first, second);
    assert!(first.iter().all(|(_, verified, _, _)| *verified));
}

#[tokio::test]
async fn test_integrity_sweep_flags_corruption_without_aborting() {
    let engine = TestEngine::new().await;

    for i in 0..6 {
        let id = format!("w-{}", i);
        engine
            .entities
            .insert("WoundAssessment", &id, json!({"index": i}))
            .await;
        engine
            .retention
            .register("WoundAssessment", &id, Utc::now() - Duration::days(10), None, "admin")
            .await
            .unwrap();
    }
    engine.retention.run_backup_sweep().await.unwrap();

    // Corrupt one artifact and drop one entity.
    let victim = engine.ledger.get("WoundAssessment", "w-2").await.unwrap();
    std::fs::write(victim.backup_location.as_ref().unwrap(), b"garbage").unwrap();
    engine.entities.remove("WoundAssessment", "w-4").await;

    let report = engine.integrity.run_sweep(Utc::now()).await.unwrap();
    assert_eq!(report.checked, 6);
    assert_eq!(report.passed, 4);
    assert_eq!(report.failed, 2);

    let corrupted = engine.ledger.get("WoundAssessment", "w-2").await.unwrap();
    assert!(!corrupted.integrity_verified);
    assert!(corrupted.requires_special_handling);
    assert!(corrupted
        .special_handling_notes
        .as_deref()
        .unwrap()
        .contains("backup artifact corrupted"));

    let missing = engine.ledger.get("WoundAssessment", "w-4").await.unwrap();
    assert!(!missing.integrity_verified);
    assert!(missing
        .special_handling_notes
        .as_deref()
        .unwrap()
        .contains("underlying entity missing"));

    // Healthy neighbours were still verified.
    let healthy = engine.ledger.get("WoundAssessment", "w-0").await.unwrap();
    assert!(healthy.integrity_verified);
}

// =============================================================================
// Crash recovery: ledger state survives a reload
// =============================================================================

#[tokio::test]
async fn test_ledger_survives_reload_mid_lifecycle() {
    let engine = TestEngine::new().await;
    let created = Utc::now() - Duration::days(3000);

    engine
        .entities
        .insert("WoundAssessment", "123", json!({"stage": 1}))
        .await;
    engine
        .retention
        .register("WoundAssessment", "123", created, None, "admin")
        .await
        .unwrap();
    engine.retention.run_backup_sweep().await.unwrap();
    engine.retention.run_deletion_sweep(Utc::now()).await.unwrap();

    // Simulate a crash: re-open the ledger file and re-derive the candidate
    // set from persisted state alone.
    let reloaded = custodia::ledger::RetentionLedger::open(
        engine.temp_dir.path().join("retention_ledger.json"),
    )
    .await
    .unwrap();

    let record = reloaded.get("WoundAssessment", "123").await.unwrap();
    assert!(record.is_backed_up);
    assert!(record.is_marked_for_deletion);
    assert!(!record.is_deleted);

    let due = reloaded
        .find_marked_ready_for_deletion(Utc::now() + Duration::days(31))
        .await;
    assert_eq!(due.len(), 1);
}

// =============================================================================
// Audit trail follows the lifecycle
// =============================================================================

#[tokio::test]
async fn test_audit_trail_records_lifecycle() {
    let engine = TestEngine::new().await;
    let created = Utc::now() - Duration::days(3000);

    engine
        .entities
        .insert("WoundAssessment", "123", json!({"stage": 1}))
        .await;
    engine
        .retention
        .register("WoundAssessment", "123", created, None, "admin")
        .await
        .unwrap();
    engine.retention.run_backup_sweep().await.unwrap();
    let now = Utc::now();
    engine.retention.run_deletion_sweep(now).await.unwrap();
    engine
        .retention
        .run_deletion_sweep(now + Duration::days(31))
        .await
        .unwrap();

    let trail = engine.audit.events_for_entity("WoundAssessment", "123").await;
    let kinds: Vec<_> = trail.iter().map(|e| e.event_type).collect();

    use custodia::audit::AuditEventType::*;
    assert_eq!(
        kinds,
        vec![RetentionRegistered, BackupCreated, MarkedForDeletion, DeletionExecuted]
    );
}

async fn sorted_rows(engine: &TestEngine) -> Vec<(String, bool, Option<String>, Option<std::path::PathBuf>)> {
    let mut rows = engine.ledger.all().await;
    rows.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    rows.into_iter()
        .map(|r| (r.entity_id, r.integrity_verified, r.backup_hash, r.backup_location))
        .collect()
}
