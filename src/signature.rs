//! Digital signature ledger.
//!
//! Binds a clinical document to a signer identity with a real Ed25519
//! signature over the document's SHA-256 hash. A signature is valid only
//! while the clock is inside the certificate validity window, the stored
//! document hash matches a freshly computed hash of current content, and the
//! cryptographic verification succeeds.
//!
//! Verification is a side-effecting read: every call persists its outcome
//! (`verified_at`, `is_valid`, notes) on the stored record, so repeated
//! verifications never diverge silently from stored state. Revocation is
//! permanent; a revoked signature fails verification without recomputation.

use crate::crypto;
use crate::error::{CustodiaError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// A signing certificate: identity, validity window, Ed25519 key material.
///
/// The signing half is present only on the signer's copy; the ledger persists
/// the public-only form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningCertificate {
    /// Certificate serial number.
    pub serial: String,
    /// Issuing authority.
    pub issuer: String,
    /// Certificate subject (the signer).
    pub subject: String,
    /// Validity window start.
    pub valid_from: DateTime<Utc>,
    /// Validity window end.
    pub valid_to: DateTime<Utc>,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Base64 PKCS#8 Ed25519 signing key; absent on the persisted form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl SigningCertificate {
    /// Issues a certificate with a fresh keypair, valid from one day ago (to
    /// absorb clock skew) for `valid_days` days.
    pub fn issue(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        valid_days: u32,
    ) -> Result<Self> {
        let keys = crypto::generate_keypair()?;
        let now = Utc::now();

        Ok(Self {
            serial: format!("CERT-{}", &Uuid::new_v4().to_string()[..8]),
            issuer: issuer.into(),
            subject: subject.into(),
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(i64::from(valid_days)),
            public_key: keys.public_key,
            signing_key: Some(keys.signing_key),
        })
    }

    /// Parses certificate data from its JSON form.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| CustodiaError::Validation(format!("certificate data unreadable: {}", e)))
    }

    /// JSON form of this certificate.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Public-only copy safe to persist.
    pub fn public_only(&self) -> Self {
        Self {
            signing_key: None,
            ..self.clone()
        }
    }

    /// Whether `at` falls inside the validity window.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_to
    }
}

/// One signing event. A document may accumulate several (co-signing,
/// re-signing); the most recent one is authoritative for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalSignature {
    /// Row ID.
    pub id: Uuid,
    /// Signed document ID.
    pub document_id: String,
    /// Document type, e.g. "WOUND_ASSESSMENT".
    pub document_type: String,
    /// Signer's ID.
    pub signer_id: String,
    /// Signer's display name.
    pub signer_name: String,
    /// Signer's professional registration number.
    pub signer_license_id: String,
    /// JSON of the public-only signing certificate.
    pub certificate_data: String,
    /// Base64 Ed25519 signature over the document hash.
    pub signature_data: String,
    /// Hash algorithm tag.
    pub hash_algorithm: String,
    /// Signature algorithm tag.
    pub signature_algorithm: String,
    /// Base64 SHA-256 of the document content at signing time.
    pub document_hash: String,
    /// Certificate serial.
    pub certificate_serial: String,
    /// Certificate issuer.
    pub certificate_issuer: String,
    /// Certificate validity window start.
    pub certificate_valid_from: DateTime<Utc>,
    /// Certificate validity window end.
    pub certificate_valid_to: DateTime<Utc>,
    /// When the document was signed.
    pub signed_at: DateTime<Utc>,
    /// When the signature was last verified.
    pub verified_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent verification; false forever once revoked.
    pub is_valid: bool,
    /// Human-readable note from the most recent verification.
    pub verification_notes: Option<String>,
    /// Set once by `revoke`; makes invalidity permanent.
    pub revoked_at: Option<DateTime<Utc>>,

    // Ledger row bookkeeping
    pub record_created_at: DateTime<Utc>,
    pub record_updated_at: Option<DateTime<Utc>>,
}

/// Input to [`SignatureLedger::sign`]; the facade accepts it verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub document_id: String,
    pub document_type: String,
    pub signer_id: String,
    pub signer_name: String,
    pub signer_license_id: String,
    pub document_content: String,
    /// JSON [`SigningCertificate`] including its signing key.
    pub certificate_data: String,
}

/// The signature ledger. Persistence mirrors the retention ledger: rows in
/// memory, flushed to a JSON file after every mutation.
pub struct SignatureLedger {
    signatures: RwLock<Vec<DigitalSignature>>,
    path: Option<PathBuf>,
}

impl SignatureLedger {
    /// Creates a memory-only ledger (tests).
    pub fn in_memory() -> Self {
        Self {
            signatures: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Opens a file-backed ledger.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut signatures = Vec::new();
        if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            signatures = serde_json::from_slice(&bytes).map_err(|e| {
                CustodiaError::Storage(format!("Signature ledger unreadable: {}", e))
            })?;
            info!(path = %path.display(), rows = signatures.len(), "Loaded signature ledger");
        }

        Ok(Self {
            signatures: RwLock::new(signatures),
            path: Some(path),
        })
    }

    /// Signs a document and persists the signature record.
    pub async fn sign(&self, request: SignRequest) -> Result<DigitalSignature> {
        self.sign_at(request, Utc::now()).await
    }

    /// Signs with an injected clock, like the sweeps. `sign` delegates here.
    pub async fn sign_at(
        &self,
        request: SignRequest,
        now: DateTime<Utc>,
    ) -> Result<DigitalSignature> {
        for (field, value) in [
            ("document id", &request.document_id),
            ("document type", &request.document_type),
            ("signer id", &request.signer_id),
            ("signer name", &request.signer_name),
        ] {
            if value.trim().is_empty() {
                return Err(CustodiaError::Validation(format!("{} cannot be empty", field)));
            }
        }

        let certificate = SigningCertificate::from_json(&request.certificate_data)?;
        let signing_key = certificate.signing_key.as_deref().ok_or_else(|| {
            CustodiaError::Validation("certificate carries no signing key".to_string())
        })?;

        if certificate.valid_to <= certificate.valid_from {
            return Err(CustodiaError::Validation(
                "certificate validity window is inverted".to_string(),
            ));
        }
        if !certificate.is_valid_at(now) {
            return Err(CustodiaError::Validation(
                "certificate is outside its validity window".to_string(),
            ));
        }

        let digest = crypto::sha256_base64(request.document_content.as_bytes());
        let signature_data = crypto::sign_message(signing_key, digest.as_bytes())?;

        let signature = DigitalSignature {
            id: Uuid::new_v4(),
            document_id: request.document_id,
            document_type: request.document_type,
            signer_id: request.signer_id,
            signer_name: request.signer_name,
            signer_license_id: request.signer_license_id,
            certificate_data: certificate.public_only().to_json()?,
            signature_data,
            hash_algorithm: "SHA-256".to_string(),
            signature_algorithm: "Ed25519".to_string(),
            document_hash: digest,
            certificate_serial: certificate.serial.clone(),
            certificate_issuer: certificate.issuer.clone(),
            certificate_valid_from: certificate.valid_from,
            certificate_valid_to: certificate.valid_to,
            signed_at: now,
            verified_at: None,
            is_valid: true,
            verification_notes: None,
            revoked_at: None,
            record_created_at: now,
            record_updated_at: None,
        };

        let mut signatures = self.signatures.write().await;
        signatures.push(signature.clone());
        self.persist(&signatures).await?;

        info!(
            document_id = %signature.document_id,
            signer_id = %signature.signer_id,
            serial = %signature.certificate_serial,
            "Document signed"
        );

        Ok(signature)
    }

    /// Verifies the most recent signature for a document against current
    /// content. Fails closed (`Ok(false)`) when no signature exists. Always
    /// persists the outcome on the stored record.
    pub async fn verify(
        &self,
        document_id: &str,
        document_type: Option<&str>,
        document_content: &str,
    ) -> Result<bool> {
        self.verify_at(document_id, document_type, document_content, Utc::now())
            .await
    }

    /// Verifies with an injected clock. `verify` delegates here.
    pub async fn verify_at(
        &self,
        document_id: &str,
        document_type: Option<&str>,
        document_content: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut signatures = self.signatures.write().await;

        let Some(index) = most_recent_index(&signatures, document_id, document_type) else {
            return Ok(false);
        };

        let signature = &mut signatures[index];
        signature.verified_at = Some(now);
        signature.record_updated_at = Some(now);

        let is_valid = if signature.revoked_at.is_some() {
            signature.verification_notes = Some("signature revoked".to_string());
            false
        } else if now > signature.certificate_valid_to {
            signature.is_valid = false;
            signature.verification_notes = Some("certificate expired".to_string());
            false
        } else {
            let digest = crypto::sha256_base64(document_content.as_bytes());
            let certificate = SigningCertificate::from_json(&signature.certificate_data)?;

            if digest != signature.document_hash {
                signature.is_valid = false;
                signature.verification_notes =
                    Some("document content hash mismatch".to_string());
                false
            } else if !crypto::verify_message(
                &certificate.public_key,
                digest.as_bytes(),
                &signature.signature_data,
            ) {
                signature.is_valid = false;
                signature.verification_notes =
                    Some("signature does not match certificate".to_string());
                false
            } else {
                signature.is_valid = true;
                signature.verification_notes = Some("signature valid".to_string());
                true
            }
        };

        self.persist(&signatures).await?;
        Ok(is_valid)
    }

    /// Revokes every signature for a document. Idempotent; returns the number
    /// of rows newly revoked.
    pub async fn revoke(&self, document_id: &str) -> Result<usize> {
        let now = Utc::now();
        let mut signatures = self.signatures.write().await;

        let mut revoked = 0;
        for signature in signatures
            .iter_mut()
            .filter(|s| s.document_id == document_id)
        {
            if signature.revoked_at.is_none() {
                signature.revoked_at = Some(now);
                revoked += 1;
            }
            signature.is_valid = false;
            signature.verification_notes = Some("signature revoked".to_string());
            signature.verified_at = Some(now);
            signature.record_updated_at = Some(now);
        }

        if revoked > 0 {
            info!(document_id, revoked, "Signatures revoked");
        }

        self.persist(&signatures).await?;
        Ok(revoked)
    }

    /// All signatures for a document, oldest first.
    pub async fn signatures_for(&self, document_id: &str) -> Vec<DigitalSignature> {
        let signatures = self.signatures.read().await;
        let mut matching: Vec<DigitalSignature> = signatures
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.signed_at);
        matching
    }

    /// Whether the document carries at least one currently-valid signature.
    pub async fn is_document_signed(&self, document_id: &str) -> bool {
        let signatures = self.signatures.read().await;
        signatures
            .iter()
            .any(|s| s.document_id == document_id && s.is_valid)
    }

    async fn persist(&self, signatures: &[DigitalSignature]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(signatures)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn most_recent_index(
    signatures: &[DigitalSignature],
    document_id: &str,
    document_type: Option<&str>,
) -> Option<usize> {
    signatures
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            s.document_id == document_id
                && document_type
                    .map(|t| s.document_type == t)
                    .unwrap_or(true)
        })
        .max_by_key(|(_, s)| s.signed_at)
        .map(|(index, _)| index)
}
