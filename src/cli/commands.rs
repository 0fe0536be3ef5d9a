use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;
use std::path::PathBuf;

use crate::config::{default_config_path, Config};
use crate::utils::error::ConfigError;

pub fn build_command() -> Command {
    Command::new("cc2mqtt")
        .version(crate::VERSION)
        .about("Bridges a CurrentCost energy monitor on a serial port to an MQTT broker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default: ~/.cc2mqtt.conf when present)"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("DEVICE")
                .help("Serial device the monitor is attached to"),
        )
        .arg(
            Arg::new("baud")
                .short('b')
                .long("baud")
                .value_name("RATE")
                .help("Serial baud rate"),
        )
        .arg(
            Arg::new("broker")
                .short('H')
                .long("broker")
                .value_name("HOST")
                .help("MQTT broker host"),
        )
        .arg(
            Arg::new("broker-port")
                .short('P')
                .long("broker-port")
                .value_name("PORT")
                .help("MQTT broker port"),
        )
        .arg(
            Arg::new("client-topic")
                .long("client-topic")
                .value_name("TOPIC")
                .help("Prefix for liveness records, must end with '/'"),
        )
        .arg(
            Arg::new("base-topic")
                .long("base-topic")
                .value_name("TOPIC")
                .help("Prefix for telemetry, must end with '/'"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .arg(
            Arg::new("write-default-config")
                .long("write-default-config")
                .value_name("FILE")
                .num_args(0..=1)
                .help("Write the default configuration and exit"),
        )
}

/// Handles `--write-default-config`. Returns the written path, or `None`
/// when the flag was not given and the bridge should run.
pub fn handle_write_default_config(matches: &ArgMatches) -> Result<Option<PathBuf>, ConfigError> {
    if !matches.contains_id("write-default-config") {
        return Ok(None);
    }

    let path = match matches.get_one::<String>("write-default-config") {
        Some(path) => PathBuf::from(path),
        None => default_config_path()
            .ok_or_else(|| ConfigError::Invalid("HOME is not set; pass a path explicitly".into()))?,
    };

    Config::default().save_to_file(&path)?;
    info!("📝 Default configuration written to {}", path.display());
    Ok(Some(path))
}
