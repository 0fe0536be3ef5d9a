pub mod error;
pub mod signals;

pub use error::{BusError, ConfigError, FrameError, ParseError, ReadTimeoutError};
