//! Custodia server binary.

use clap::Parser;
use custodia::config::CustodiaConfig;
use custodia::domain::InMemoryEntityStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Regulatory data-lifecycle and integrity engine.
#[derive(Parser)]
#[command(name = "custodia", version, about)]
struct Args {
    /// Path to a JSON configuration file. Without one, the development
    /// configuration is used.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> custodia::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CustodiaConfig::from_file(path)?,
        None => CustodiaConfig::development(),
    };

    // Standalone deployments run against the in-memory domain store; when
    // embedded in the platform, the owning service injects its real accessor
    // through custodia::run instead.
    let entities = Arc::new(InMemoryEntityStore::new());

    custodia::run(config, entities).await
}
