pub mod settings;

pub use settings::{default_config_path, Config, MqttConfig, SerialConfig, TimingConfig};
