pub mod commands;

pub use commands::{build_command, handle_write_default_config};
