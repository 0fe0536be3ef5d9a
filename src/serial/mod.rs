pub mod channel;

pub use channel::{LineChannel, SerialLineChannel};
