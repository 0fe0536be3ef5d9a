pub mod currentcost;

pub use currentcost::{FrameReader, Reading, ReadingParser};
