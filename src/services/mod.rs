pub mod bridge_service;

pub use bridge_service::{AcquisitionStats, BridgeService, StatsSnapshot};
