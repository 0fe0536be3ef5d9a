use anyhow::{Context, Result};
use log::info;

use cc2mqtt::cli::{build_command, handle_write_default_config};
use cc2mqtt::utils::signals::wait_for_shutdown_signal;
use cc2mqtt::{BridgeService, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_command().get_matches();

    let default_level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Some(path) = handle_write_default_config(&matches)? {
        println!("✅ Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = Config::load(&matches).context("failed to load configuration")?;
    info!("🏁 cc2mqtt v{} starting", cc2mqtt::VERSION);
    info!(
        "⚙️  Serial {} @ {} baud, broker {}:{}",
        config.serial.port, config.serial.baud_rate, config.mqtt.host, config.mqtt.port
    );

    let service = BridgeService::from_config(&config);
    let status = service
        .run_until(wait_for_shutdown_signal())
        .await
        .context("failed to wait for a shutdown signal")?;

    // A serial read may still be blocked on its worker thread; exit without
    // waiting for it.
    std::process::exit(status);
}
