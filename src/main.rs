use log::{error, info};
use mirror_trader::realtime::cancel_on_signal;
use mirror_trader::{init_logging, TraderConfig, TradingEngine};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional path to a JSON settings file; secrets always come from the environment
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TraderConfig::load(config_path.as_deref())?;

    init_logging(&config.logging.level, config.logging.file.as_deref())?;
    info!(
        "Starting mirror trader: {} {} testnet={} dry_run={}",
        config.master_symbol(),
        config.timeframe,
        config.testnet,
        config.dry_run
    );

    let engine = TradingEngine::build(config)?;
    let cancel = CancellationToken::new();

    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), cancel.clone()));

    if let Err(e) = engine.run(cancel).await {
        error!("Engine stopped: {}", e);
        return Err(e.into());
    }
    info!("Shutdown complete");
    Ok(())
}
