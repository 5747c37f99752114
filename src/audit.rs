//! Lifecycle audit trail.
//!
//! Every state transition the engine performs — registration, backup, marking,
//! deletion, integrity findings, signing and verification — is recorded as a
//! typed event. The archiver embeds a per-entity excerpt of this trail inside
//! each backup artifact so the artifact is self-describing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Audit event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Retention lifecycle
    RetentionRegistered,
    BackupCreated,
    BackupFailed,
    MarkedForDeletion,
    DeletionExecuted,
    DeletionAborted,
    RestorePerformed,

    // Integrity sweep findings
    IntegrityVerified,
    IntegrityFailed,

    // Signature ledger
    DocumentSigned,
    SignatureVerified,
    SignatureRevoked,
}

/// A single audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub id: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event type.
    pub event_type: AuditEventType,
    /// Entity type, for retention events.
    pub entity_type: Option<String>,
    /// Entity ID, for retention events.
    pub entity_id: Option<String>,
    /// Document ID, for signature events.
    pub document_id: Option<String>,
    /// Who performed or triggered the action.
    pub actor: String,
    /// Whether the action succeeded.
    pub success: bool,
    /// Free-form detail (failure reason, check notes).
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Creates a new successful audit event.
    pub fn new(event_type: AuditEventType, actor: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            entity_type: None,
            entity_id: None,
            document_id: None,
            actor: actor.into(),
            success: true,
            detail: None,
        }
    }

    /// Sets the affected entity.
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Sets the affected document.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Sets a detail message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Marks the event as failed.
    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.success = false;
        self.detail = Some(detail.into());
        self
    }
}

/// Bounded in-memory audit log.
pub struct AuditLog {
    events: RwLock<VecDeque<AuditEvent>>,
    max_buffer_size: usize,
}

impl AuditLog {
    /// Creates a new audit log with the default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(100_000)
    }

    /// Creates a new audit log with an explicit buffer bound.
    pub fn with_capacity(max_buffer_size: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(max_buffer_size.min(10_000))),
            max_buffer_size,
        }
    }

    /// Records an event, evicting the oldest entries when full.
    pub async fn record(&self, event: AuditEvent) {
        let mut events = self.events.write().await;
        while events.len() >= self.max_buffer_size {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// All events touching one entity, oldest first. This is the excerpt the
    /// archiver embeds in backup artifacts.
    pub async fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| {
                e.entity_type.as_deref() == Some(entity_type)
                    && e.entity_id.as_deref() == Some(entity_id)
            })
            .cloned()
            .collect()
    }

    /// Most recent events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Total events currently buffered.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_query_by_entity() {
        let log = AuditLog::new();

        log.record(
            AuditEvent::new(AuditEventType::RetentionRegistered, "admin")
                .with_entity("WoundAssessment", "123"),
        )
        .await;
        log.record(
            AuditEvent::new(AuditEventType::BackupCreated, "system")
                .with_entity("WoundAssessment", "123"),
        )
        .await;
        log.record(
            AuditEvent::new(AuditEventType::BackupCreated, "system")
                .with_entity("Patient", "9"),
        )
        .await;

        let excerpt = log.events_for_entity("WoundAssessment", "123").await;
        assert_eq!(excerpt.len(), 2);
        assert_eq!(excerpt[0].event_type, AuditEventType::RetentionRegistered);
        assert_eq!(excerpt[1].event_type, AuditEventType::BackupCreated);
    }

    #[tokio::test]
    async fn test_failed_event_carries_detail() {
        let log = AuditLog::new();
        log.record(
            AuditEvent::new(AuditEventType::BackupFailed, "system")
                .with_entity("Patient", "9")
                .failed("disk full"),
        )
        .await;

        let events = log.recent(1).await;
        assert!(!events[0].success);
        assert_eq!(events[0].detail.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_buffer_eviction() {
        let log = AuditLog::with_capacity(3);
        for i in 0..5 {
            log.record(
                AuditEvent::new(AuditEventType::IntegrityVerified, "system")
                    .with_entity("Patient", i.to_string()),
            )
            .await;
        }

        assert_eq!(log.len().await, 3);
        // Oldest two were evicted
        assert!(log.events_for_entity("Patient", "0").await.is_empty());
        assert_eq!(log.events_for_entity("Patient", "4").await.len(), 1);
    }
}
