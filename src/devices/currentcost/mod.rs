pub mod frame_reader;
pub mod parser;
pub mod reading;

pub use frame_reader::{classify_line, FrameReader, LineVerdict, MAX_ATTEMPTS};
pub use parser::ReadingParser;
pub use reading::{ChannelData, ChannelMap, Reading};
