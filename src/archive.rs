//! Backup archiver.
//!
//! Serializes an entity snapshot together with archive metadata and an audit
//! excerpt into a single artifact on durable storage, optionally sealed with
//! AES-256-GCM, identified by `(location, hex SHA-256 digest)`. A sibling
//! `.hash` file carries the digest next to the artifact. Artifacts are
//! immutable: a new backup writes a new artifact.

use crate::audit::{AuditEvent, AuditLog};
use crate::crypto;
use crate::domain::EntityStore;
use crate::error::{CustodiaError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// File extension for archive artifacts.
pub const ARCHIVE_EXTENSION: &str = "cba";

/// Archive format version.
const SCHEMA_VERSION: u32 = 1;

/// Metadata section of an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Archive format version.
    pub schema_version: u32,
    /// Entity type of the snapshot.
    pub entity_type: String,
    /// Entity ID of the snapshot.
    pub entity_id: String,
    /// When the archive was created.
    pub created_at: DateTime<Utc>,
    /// Whether the artifact on disk is sealed.
    pub encrypted: bool,
    /// Who triggered the backup.
    pub created_by: String,
}

/// The full archive payload: manifest, snapshot, audit excerpt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveDocument {
    pub manifest: ArchiveManifest,
    pub entity_snapshot: serde_json::Value,
    pub audit_trail: Vec<AuditEvent>,
}

/// Directory-listing entry for an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// AES-256-GCM sealing for archive confidentiality. Nonce is random per seal
/// and prepended to the ciphertext.
pub struct ArchiveCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl ArchiveCipher {
    /// Builds a cipher from base64 key material (32 bytes decoded).
    pub fn from_base64(key_b64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_b64)
            .map_err(|_| CustodiaError::Crypto("Archive key is not valid base64".to_string()))?;
        Self::from_bytes(&key_bytes)
    }

    /// Builds a cipher from raw key bytes.
    pub fn from_bytes(key_bytes: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| CustodiaError::Crypto("Archive key must be 32 bytes".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Generates a fresh key; returns the cipher and the base64 key material.
    pub fn generate() -> Result<(Self, String)> {
        let rng = SystemRandom::new();
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes)
            .map_err(|_| CustodiaError::Crypto("Failed to generate archive key".to_string()))?;
        Ok((Self::from_bytes(&key_bytes)?, BASE64.encode(key_bytes)))
    }

    /// Seals plaintext; output is nonce || ciphertext || tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CustodiaError::Crypto("Failed to generate nonce".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CustodiaError::Crypto("Archive sealing failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    /// Opens a sealed artifact.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CustodiaError::Crypto("Sealed artifact too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CustodiaError::Crypto("Sealed artifact has a bad nonce".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CustodiaError::Crypto("Archive opening failed".to_string()))?;
        Ok(plaintext.to_vec())
    }
}

/// The backup archiver.
pub struct BackupArchiver {
    backup_dir: PathBuf,
    cipher: Option<ArchiveCipher>,
    entities: Arc<dyn EntityStore>,
    audit: Arc<AuditLog>,
}

impl BackupArchiver {
    /// Creates an archiver writing into `backup_dir`.
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        cipher: Option<ArchiveCipher>,
        entities: Arc<dyn EntityStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            cipher,
            entities,
            audit,
        }
    }

    /// Creates a backup artifact for one entity; returns `(location, digest)`.
    ///
    /// The ledger row is untouched here — the caller marks the row backed up
    /// only on success, leaving failed rows eligible for the next sweep.
    pub async fn create_backup(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<(PathBuf, String)> {
        let snapshot = self
            .entities
            .snapshot(entity_type, entity_id)
            .await
            .map_err(|e| CustodiaError::BackupFailed(format!("snapshot unavailable: {}", e)))?;

        let created_at = Utc::now();
        let document = ArchiveDocument {
            manifest: ArchiveManifest {
                schema_version: SCHEMA_VERSION,
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                created_at,
                encrypted: self.cipher.is_some(),
                created_by: "system:auto-backup".to_string(),
            },
            entity_snapshot: snapshot,
            audit_trail: self.audit.events_for_entity(entity_type, entity_id).await,
        };

        let mut bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| CustodiaError::BackupFailed(format!("serialization: {}", e)))?;
        if let Some(cipher) = &self.cipher {
            bytes = cipher
                .seal(&bytes)
                .map_err(|e| CustodiaError::BackupFailed(e.to_string()))?;
        }

        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| CustodiaError::BackupFailed(format!("backup dir: {}", e)))?;

        let name = format!(
            "{}_{}_{}.{}",
            sanitize(entity_type),
            sanitize(entity_id),
            created_at.format("%Y%m%d_%H%M%S"),
            ARCHIVE_EXTENSION,
        );
        let location = self.backup_dir.join(&name);

        tokio::fs::write(&location, &bytes)
            .await
            .map_err(|e| CustodiaError::BackupFailed(format!("write: {}", e)))?;

        let digest = crypto::sha256_hex(&bytes);
        let hash_path = sidecar_path(&location);
        tokio::fs::write(&hash_path, digest.as_bytes())
            .await
            .map_err(|e| CustodiaError::BackupFailed(format!("hash sidecar: {}", e)))?;

        debug!(
            entity_type,
            entity_id,
            location = %location.display(),
            "Backup artifact written"
        );

        Ok((location, digest))
    }

    /// Recomputes the artifact digest and compares it to `expected_hash`.
    /// Missing or unreadable artifacts yield `false`, never an error, so
    /// callers flag integrity loss instead of crashing.
    pub async fn verify_integrity(&self, location: &Path, expected_hash: &str) -> bool {
        match crypto::file_digest_hex(location).await {
            Ok(digest) => digest == expected_hash,
            Err(_) => false,
        }
    }

    /// Replays the archive's snapshot back into the domain store. Returns
    /// `false` on any structural failure.
    pub async fn restore(&self, location: &Path) -> bool {
        let Ok(bytes) = tokio::fs::read(location).await else {
            warn!(location = %location.display(), "Restore failed: artifact unreadable");
            return false;
        };

        let document = match self.decode(&bytes) {
            Some(document) => document,
            None => {
                warn!(location = %location.display(), "Restore failed: artifact undecodable");
                return false;
            }
        };

        let manifest = &document.manifest;
        if self
            .entities
            .restore_snapshot(
                &manifest.entity_type,
                &manifest.entity_id,
                document.entity_snapshot.clone(),
            )
            .await
            .is_err()
        {
            warn!(location = %location.display(), "Restore failed: domain store rejected snapshot");
            return false;
        }

        true
    }

    /// Lists archives in the backup directory. Best effort: unreadable
    /// entries are skipped, a missing directory yields an empty list.
    pub async fn list_backups(&self) -> Vec<ArchiveInfo> {
        let Ok(mut entries) = tokio::fs::read_dir(&self.backup_dir).await else {
            return Vec::new();
        };

        let mut archives = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION) {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            archives.push(ArchiveInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size_bytes: metadata.len(),
                last_modified,
            });
        }

        archives.sort_by(|a, b| a.name.cmp(&b.name));
        archives
    }

    /// Decodes artifact bytes: plaintext JSON, or sealed JSON when a cipher
    /// is configured. Mixed directories occur when encryption is toggled.
    fn decode(&self, bytes: &[u8]) -> Option<ArchiveDocument> {
        if let Ok(document) = serde_json::from_slice::<ArchiveDocument>(bytes) {
            return Some(document);
        }
        let cipher = self.cipher.as_ref()?;
        let plaintext = cipher.open(bytes).ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}

/// Path of the digest sidecar for an artifact.
pub fn sidecar_path(location: &Path) -> PathBuf {
    let mut name = location.as_os_str().to_owned();
    name.push(".hash");
    PathBuf::from(name)
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
