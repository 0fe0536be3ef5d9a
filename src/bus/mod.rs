pub mod identity;
pub mod state;
pub mod supervisor;
pub mod topics;
pub mod transport;

pub use state::ConnectionState;
pub use supervisor::{BusSupervisor, SupervisorSettings};
pub use topics::{Publication, Topics};
pub use transport::{BusTransport, InboundMessage, MqttTransport, SessionOptions};
