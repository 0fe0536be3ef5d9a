//! CurrentCost to MQTT bridge.
//!
//! Reads XML frames from a CurrentCost energy monitor on a serial port,
//! parses them into readings, and republishes every field as a retained
//! MQTT message. The broker link is supervised: it reconnects with a fixed
//! backoff, announces liveness and answers ping requests.

pub mod bus;
pub mod cli;
pub mod config;
pub mod devices;
pub mod serial;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use bus::{BusSupervisor, ConnectionState, MqttTransport, Topics};
pub use config::Config;
pub use devices::{FrameReader, Reading, ReadingParser};
pub use serial::SerialLineChannel;
pub use services::BridgeService;
pub use utils::error::{BusError, ConfigError, FrameError, ParseError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
