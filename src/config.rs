//! Configuration module for Custodia.
//!
//! Everything an operator can tune lives here: storage locations, the default
//! retention window, archive encryption, sweep schedules, and the HTTP/metrics
//! surface. Business rules (the safety invariant, the grace period semantics)
//! are not configuration.

use crate::error::{CustodiaError, Result};
use crate::scheduling::cron::Schedule;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a Custodia node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustodiaConfig {
    /// Storage locations.
    pub storage: StorageConfig,
    /// Retention policy defaults.
    pub retention: RetentionPolicyConfig,
    /// Archive encryption settings.
    pub encryption: EncryptionConfig,
    /// Sweep scheduling settings.
    pub sweeps: SweepConfig,
    /// Compliance facade settings.
    pub api: ApiConfig,
    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl CustodiaConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CustodiaError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CustodiaError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.retention.default_retention_days == 0 {
            return Err(CustodiaError::InvalidConfig {
                field: "retention.default_retention_days".to_string(),
                reason: "Retention window must be at least one day".to_string(),
            });
        }

        if self.retention.grace_days == 0 {
            return Err(CustodiaError::InvalidConfig {
                field: "retention.grace_days".to_string(),
                reason: "Grace period must be at least one day".to_string(),
            });
        }

        if self.sweeps.verify_workers == 0 {
            return Err(CustodiaError::InvalidConfig {
                field: "sweeps.verify_workers".to_string(),
                reason: "Verification pool needs at least one worker".to_string(),
            });
        }

        for (field, expr) in [
            ("sweeps.backup_schedule", &self.sweeps.backup_schedule),
            ("sweeps.deletion_schedule", &self.sweeps.deletion_schedule),
            ("sweeps.integrity_schedule", &self.sweeps.integrity_schedule),
        ] {
            if let Err(e) = Schedule::parse(expr) {
                return Err(CustodiaError::InvalidConfig {
                    field: field.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        if self.encryption.enabled {
            if let Some(key) = &self.encryption.key {
                use base64::{engine::general_purpose::STANDARD, Engine as _};
                let decoded = STANDARD.decode(key).map_err(|_| CustodiaError::InvalidConfig {
                    field: "encryption.key".to_string(),
                    reason: "Key material must be base64".to_string(),
                })?;
                if decoded.len() != 32 {
                    return Err(CustodiaError::InvalidConfig {
                        field: "encryption.key".to_string(),
                        reason: "AES-256 key material must decode to 32 bytes".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            storage: StorageConfig {
                ledger_path: PathBuf::from("/tmp/custodia/retention_ledger.json"),
                signature_path: PathBuf::from("/tmp/custodia/signature_ledger.json"),
                backup_dir: PathBuf::from("/tmp/custodia/backups"),
            },
            ..Default::default()
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Retention ledger file.
    pub ledger_path: PathBuf,
    /// Signature ledger file.
    pub signature_path: PathBuf,
    /// Directory holding backup archives and their hash sidecars.
    pub backup_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("/var/lib/custodia/retention_ledger.json"),
            signature_path: PathBuf::from("/var/lib/custodia/signature_ledger.json"),
            backup_dir: PathBuf::from("/var/lib/custodia/backups"),
        }
    }
}

/// Retention policy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicyConfig {
    /// Default retention window in days (2555 days, roughly seven years).
    pub default_retention_days: u32,
    /// Grace period between marking and executing a deletion, in days.
    pub grace_days: u32,
}

impl Default for RetentionPolicyConfig {
    fn default() -> Self {
        Self {
            default_retention_days: 2555,
            grace_days: 30,
        }
    }
}

/// Archive encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Whether backup archives are sealed with AES-256-GCM.
    pub enabled: bool,
    /// Base64 key material (32 bytes decoded). When absent and encryption is
    /// enabled, a fresh key is generated at startup and logged once.
    pub key: Option<String>,
}

impl EncryptionConfig {
    /// Enable encryption with generated key material.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            key: None,
        }
    }
}

/// Sweep scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Cron schedule for the daily backup sweep.
    pub backup_schedule: String,
    /// Cron schedule for the daily deletion sweep. Must fire after the backup
    /// sweep; deletion only ever acts on backup state persisted by an earlier
    /// sweep, so the two never race on a row within one cycle.
    pub deletion_schedule: String,
    /// Cron schedule for the weekly integrity sweep.
    pub integrity_schedule: String,
    /// Re-verify records whose last integrity check is older than this.
    #[serde(with = "duration_secs")]
    pub verify_staleness: Duration,
    /// Bounded worker pool size for the integrity sweep.
    pub verify_workers: usize,
    /// Per-record timeout inside the integrity sweep.
    #[serde(with = "duration_secs")]
    pub verify_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            backup_schedule: "0 2 * * *".to_string(),
            deletion_schedule: "0 3 * * *".to_string(),
            integrity_schedule: "0 4 * * 0".to_string(),
            verify_staleness: Duration::from_secs(7 * 24 * 3600),
            verify_workers: 5,
            verify_timeout: Duration::from_secs(30),
        }
    }
}

/// Compliance facade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Whether the HTTP facade is served.
    pub enabled: bool,
    /// Address to bind the facade.
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:8750".parse().expect("valid socket address"),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Emit JSON-formatted logs.
    pub json_logs: bool,
    /// Whether the Prometheus endpoint is served.
    pub metrics_enabled: bool,
    /// Address to bind the metrics server.
    pub metrics_addr: SocketAddr,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
        }
    }
}

/// Serde helper storing `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CustodiaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention.default_retention_days, 2555);
        assert_eq!(config.retention.grace_days, 30);
        assert_eq!(config.sweeps.verify_workers, 5);
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let mut config = CustodiaConfig::default();
        config.retention.default_retention_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_schedule() {
        let mut config = CustodiaConfig::default();
        config.sweeps.integrity_schedule = "not a cron".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_key() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let mut config = CustodiaConfig::default();
        config.encryption.enabled = true;
        config.encryption.key = Some(STANDARD.encode([0u8; 16]));
        assert!(config.validate().is_err());

        config.encryption.key = Some(STANDARD.encode([0u8; 32]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trip() {
        let config = CustodiaConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CustodiaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.sweeps.verify_staleness,
            config.sweeps.verify_staleness
        );
        assert_eq!(parsed.storage.backup_dir, config.storage.backup_dir);
    }
}
