//! Observability module for Custodia.
//!
//! Provides logging initialization and the Prometheus metrics endpoint.

use crate::config::ObservabilityConfig;
use crate::error::{CustodiaError, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| CustodiaError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| CustodiaError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| CustodiaError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| CustodiaError::Network(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    // Ledger metrics
    gauge!("custodia_retention_records_total").set(0.0);
    counter!("custodia_retention_registrations_total").absolute(0);

    // Backup sweep metrics
    counter!("custodia_backups_created_total").absolute(0);
    counter!("custodia_backups_failed_total").absolute(0);

    // Deletion sweep metrics
    counter!("custodia_deletions_marked_total").absolute(0);
    counter!("custodia_deletions_executed_total").absolute(0);
    counter!("custodia_deletions_aborted_total").absolute(0);

    // Integrity sweep metrics
    counter!("custodia_integrity_checks_total").absolute(0);
    counter!("custodia_integrity_failures_total").absolute(0);

    // Signature ledger metrics
    counter!("custodia_signatures_created_total").absolute(0);
    counter!("custodia_signature_verifications_total").absolute(0);
}

/// Record a retention registration.
pub fn record_registration() {
    counter!("custodia_retention_registrations_total").increment(1);
}

/// Record a backup attempt outcome.
pub fn record_backup(success: bool) {
    if success {
        counter!("custodia_backups_created_total").increment(1);
    } else {
        counter!("custodia_backups_failed_total").increment(1);
    }
}

/// Record a record being marked for deletion.
pub fn record_deletion_marked() {
    counter!("custodia_deletions_marked_total").increment(1);
}

/// Record a deletion execution or its abort.
pub fn record_deletion(executed: bool) {
    if executed {
        counter!("custodia_deletions_executed_total").increment(1);
    } else {
        counter!("custodia_deletions_aborted_total").increment(1);
    }
}

/// Record an integrity check outcome.
pub fn record_integrity_check(passed: bool) {
    counter!("custodia_integrity_checks_total").increment(1);
    if !passed {
        counter!("custodia_integrity_failures_total").increment(1);
    }
}

/// Record a signing event.
pub fn record_signature_created() {
    counter!("custodia_signatures_created_total").increment(1);
}

/// Record a signature verification.
pub fn record_signature_verification(valid: bool) {
    counter!(
        "custodia_signature_verifications_total",
        "outcome" => if valid { "valid" } else { "invalid" }
    )
    .increment(1);
}

/// Update the ledger size gauge.
pub fn update_ledger_size(total: u64) {
    gauge!("custodia_retention_records_total").set(total as f64);
}
