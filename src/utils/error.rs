use thiserror::Error;

/// The frame reader used up its attempt budget without seeing a complete message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not read a frame from {port} after {attempts} attempts")]
pub struct ReadTimeoutError {
    pub port: String,
    pub attempts: u32,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Timeout(#[from] ReadTimeoutError),

    #[error("Serial channel error: {0}")]
    Channel(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Number of <{0}> tags > 1")]
    DuplicateTag(String),

    #[error("Invalid number in <{tag}>: {value:?}")]
    InvalidNumber { tag: String, value: String },
}

impl From<roxmltree::Error> for ParseError {
    fn from(err: roxmltree::Error) -> Self {
        ParseError::Malformed(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    #[error("Connection attempt cancelled")]
    Cancelled,
}

impl From<rumqttc::ConnectionError> for BusError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        BusError::Link(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
